//! Step configuration.
//!
//! A [`StepConfig`] can be built in code, loaded from TOML, or assembled by
//! the CLI from flags. Every field has a default so a config file only needs
//! the keys it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Dialect;
use crate::error::{Result, StepError};
use crate::policy::{DrainStrategy, ExecutionPolicy};
use crate::resolver::MappedWorkspace;
use crate::sink::Importance;

/// How to launch the scripting engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine executable.
    pub program: String,

    /// Arguments placed before the command text.
    pub args: Vec<String>,

    /// Dialect used to render file invocations.
    pub dialect: Dialect,

    /// Working directory for the engine (inherits the caller's if unset).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// PowerShell 7 in non-interactive mode.
    pub fn powershell() -> Self {
        Self {
            program: "pwsh".to_string(),
            args: vec![
                "-NoLogo".to_string(),
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
            ],
            dialect: Dialect::PowerShell,
            working_dir: None,
        }
    }

    /// A POSIX shell running the command with `-c`.
    pub fn posix_shell() -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
            dialect: Dialect::Posix,
            working_dir: None,
        }
    }

    /// Preset by name: `pwsh`/`powershell` or `sh`/`posix`.
    pub fn preset(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pwsh" | "powershell" => Ok(Self::powershell()),
            "sh" | "posix" => Ok(Self::posix_shell()),
            other => Err(StepError::Config(format!("unknown engine preset: {other}"))),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::powershell()
    }
}

/// Maps a version-control server folder to a local working folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceMapping {
    pub server_path: String,
    pub local_path: PathBuf,
}

impl std::str::FromStr for WorkspaceMapping {
    type Err = StepError;

    /// Parse `SERVER=LOCAL`, e.g. `$/Project/Main=/agent/_work/src`.
    fn from_str(s: &str) -> Result<Self> {
        let (server, local) = s
            .split_once('=')
            .ok_or_else(|| StepError::Config(format!("mapping must be SERVER=LOCAL: {s}")))?;
        let server = server.trim();
        let local = local.trim();
        if server.is_empty() || local.is_empty() {
            return Err(StepError::Config(format!(
                "mapping must be SERVER=LOCAL: {s}"
            )));
        }
        Ok(Self {
            server_path: server.to_string(),
            local_path: PathBuf::from(local),
        })
    }
}

/// Configuration for one script step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StepConfig {
    pub engine: EngineConfig,

    /// Importance of plain output written by the script.
    pub message_importance: Importance,

    /// Importance of warnings written by the script.
    pub warning_importance: Importance,

    pub policy: ExecutionPolicy,

    pub drain: DrainStrategy,

    /// Timeout in seconds (0 = wait until the engine finishes).
    pub timeout_secs: u64,

    pub workspace_mappings: Vec<WorkspaceMapping>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            message_importance: Importance::High,
            warning_importance: Importance::High,
            policy: ExecutionPolicy::default(),
            drain: DrainStrategy::default(),
            timeout_secs: 0,
            workspace_mappings: Vec::new(),
        }
    }
}

impl StepConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StepError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Workspace built from the configured mappings, if there are any.
    pub fn workspace(&self) -> Option<MappedWorkspace> {
        if self.workspace_mappings.is_empty() {
            return None;
        }
        let mut workspace = MappedWorkspace::new();
        for mapping in &self.workspace_mappings {
            workspace.map(&mapping.server_path, &mapping.local_path);
        }
        Some(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_config_default() {
        let config = StepConfig::default();
        assert_eq!(config.engine.program, "pwsh");
        assert_eq!(config.message_importance, Importance::High);
        assert_eq!(config.warning_importance, Importance::High);
        assert_eq!(config.drain, DrainStrategy::Streaming);
        assert!(config.timeout().is_none());
        assert!(config.workspace().is_none());
    }

    #[test]
    fn test_step_config_from_toml() {
        let text = r#"
            timeout_secs = 30
            drain = "deferred"
            message_importance = "normal"

            [engine]
            program = "sh"
            args = ["-c"]
            dialect = "posix"

            [policy]
            fail_build_on_first_error = true
            is_test_phase = true

            [[workspace_mappings]]
            server_path = "$/Project"
            local_path = "/agent/src"
        "#;

        let config = StepConfig::from_toml_str(text).expect("parse");
        assert_eq!(config.engine, EngineConfig::posix_shell());
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.drain, DrainStrategy::Deferred);
        assert_eq!(config.message_importance, Importance::Normal);
        assert_eq!(config.warning_importance, Importance::High);
        assert!(config.policy.fail_build_on_error);
        assert!(config.policy.fail_build_on_first_error);
        assert!(config.policy.is_test_phase);
        assert_eq!(config.workspace_mappings.len(), 1);
        assert!(config.workspace().is_some());
    }

    #[test]
    fn test_step_config_rejects_bad_toml() {
        let err = StepConfig::from_toml_str("drain = \"sideways\"").unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
    }

    #[test]
    fn test_engine_preset() {
        assert_eq!(EngineConfig::preset("sh").unwrap().dialect, Dialect::Posix);
        assert_eq!(
            EngineConfig::preset("PowerShell").unwrap().program,
            "pwsh"
        );
        assert!(EngineConfig::preset("cmd").is_err());
    }

    #[test]
    fn test_workspace_mapping_parse() {
        let mapping: WorkspaceMapping = "$/Project/Main=/agent/src".parse().unwrap();
        assert_eq!(mapping.server_path, "$/Project/Main");
        assert_eq!(mapping.local_path, PathBuf::from("/agent/src"));
        assert!("$/Project".parse::<WorkspaceMapping>().is_err());
        assert!("=/agent".parse::<WorkspaceMapping>().is_err());
    }
}
