//! Scripting engine seam.
//!
//! An engine turns a [`ResolvedCommand`] into a running session that yields
//! [`EngineEvent`]s in arrival order, exact within one output stream. The
//! controller owns the session for exactly one activation and always calls
//! [`EngineSession::shutdown`] before returning.

pub mod process;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::EnvMap;
use crate::error::Result;
use crate::host::ProgressRecord;
use crate::resolver::ResolvedCommand;

pub use process::{ProcessEngine, ProcessSession};

/// One interaction raised by the engine while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A result record on the output stream.
    Output(String),
    /// A record on the error stream.
    Error(String),
    Warning(String),
    Verbose(String),
    Debug(String),
    /// Progress report. `record` is `None` when the engine sent an empty one.
    Progress {
        source_id: i64,
        record: Option<ProgressRecord>,
    },
    /// The script asked the host to exit with this code.
    ExitRequested(i32),
    /// The engine finished. `None` when no exit code is available.
    Exited(Option<i32>),
    /// The engine itself broke; the run cannot continue.
    Faulted(String),
}

/// Command-line dialect of an engine, used to synthesize file invocations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    #[serde(rename = "powershell")]
    PowerShell,
    Posix,
}

impl Dialect {
    /// Render "invoke `path` with `arguments`".
    pub fn invoke_file(&self, path: &str, arguments: &str) -> String {
        let line = match self {
            Dialect::PowerShell => format!("& '{}' {}", path.replace('\'', "''"), arguments),
            Dialect::Posix => format!("sh '{}' {}", path.replace('\'', "'\\''"), arguments),
        };
        line.trim_end().to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::PowerShell => f.write_str("powershell"),
            Dialect::Posix => f.write_str("posix"),
        }
    }
}

/// A running engine session.
#[async_trait]
pub trait EngineSession: Send {
    /// Next event, or `None` once the session has nothing more to report.
    async fn next_event(&mut self) -> Option<EngineEvent>;

    /// Stop the engine if it is still running and release its resources.
    /// Safe to call more than once.
    async fn shutdown(&mut self);
}

/// An external scripting runtime.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Start executing `command` with `env` added to the engine environment.
    async fn open_session(
        &self,
        command: &ResolvedCommand,
        env: &EnvMap,
    ) -> Result<Box<dyn EngineSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powershell_invoke_file() {
        let line = Dialect::PowerShell.invoke_file("C:\\build\\run.ps1", "-Target Release");
        assert_eq!(line, "& 'C:\\build\\run.ps1' -Target Release");
    }

    #[test]
    fn test_invoke_file_without_arguments_is_trimmed() {
        assert_eq!(
            Dialect::PowerShell.invoke_file("/src/run.ps1", ""),
            "& '/src/run.ps1'"
        );
        assert_eq!(Dialect::Posix.invoke_file("/src/run.sh", ""), "sh '/src/run.sh'");
    }

    #[test]
    fn test_invoke_file_escapes_quotes() {
        assert_eq!(
            Dialect::PowerShell.invoke_file("/src/it's.ps1", "a"),
            "& '/src/it''s.ps1' a"
        );
        assert_eq!(
            Dialect::Posix.invoke_file("/src/it's.sh", "a"),
            "sh '/src/it'\\''s.sh' a"
        );
    }
}
