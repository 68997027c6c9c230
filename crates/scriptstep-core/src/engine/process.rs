//! Engine backed by a child process (`pwsh -Command`, `sh -c`, ...).
//!
//! Stdout and stderr are read line by line on their own tasks and turned
//! into [`EngineEvent`]s as soon as each line arrives. Stdout lines carrying
//! the engine's stream prefixes (`WARNING: `, `VERBOSE: `, `DEBUG: `) are
//! classified accordingly; stderr lines are error records. The two pipes
//! are read independently, so ordering is exact within a stream only.
//!
//! On Unix the engine leads its own process group. Shutdown and drop kill
//! the whole group, taking down anything the script started in the
//! background.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::EnvMap;
use crate::error::{Result, StepError};
use crate::resolver::ResolvedCommand;

use super::{Dialect, EngineEvent, EngineSession, ScriptEngine};

/// Bound on buffered events before the readers wait for the controller.
const EVENT_BUFFER: usize = 256;

/// Scripting engine launched as a child process per session.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[async_trait]
impl ScriptEngine for ProcessEngine {
    fn name(&self) -> &str {
        &self.config.program
    }

    fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    async fn open_session(
        &self,
        command: &ResolvedCommand,
        env: &EnvMap,
    ) -> Result<Box<dyn EngineSession>> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(command.executable_text())
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            StepError::Engine(format!("failed to start {}: {e}", self.config.program))
        })?;
        let group = child.id();
        debug!(program = %self.config.program, pid = ?group, "engine process started");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, tx.clone(), classify_stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, tx.clone(), EngineEvent::Error)));
        }
        drop(tx);

        Ok(Box::new(ProcessSession {
            child,
            group,
            events: rx,
            readers,
            finished: false,
        }))
    }
}

/// A running engine process.
///
/// The child and its process group are killed when the session is
/// dropped, so resources are released even if `shutdown` is never reached.
pub struct ProcessSession {
    child: Child,
    /// Process group id (the leader's pid); `None` once the group is killed.
    group: Option<u32>,
    events: mpsc::Receiver<EngineEvent>,
    readers: Vec<JoinHandle<()>>,
    finished: bool,
}

#[async_trait]
impl EngineSession for ProcessSession {
    async fn next_event(&mut self) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.events.recv().await {
            return Some(event);
        }

        // Both streams closed: the process is done writing.
        self.finished = true;
        match self.child.wait().await {
            Ok(status) => Some(EngineEvent::Exited(status.code())),
            Err(e) => Some(EngineEvent::Faulted(format!(
                "failed to wait for engine process: {e}"
            ))),
        }
    }

    async fn shutdown(&mut self) {
        self.kill_group();
        if !self.finished {
            self.finished = true;
            if let Err(e) = self.child.start_kill() {
                debug!(error = %e, "engine process already gone");
            }
            let _ = self.child.wait().await;
        }
        self.events.close();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl ProcessSession {
    fn kill_group(&mut self) {
        if let Some(group) = self.group.take() {
            kill_process_group(group);
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.kill_group();
    }
}

#[cfg(unix)]
fn kill_process_group(group: u32) {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return;
    };
    // SAFETY: killpg takes no pointers; an unknown group yields ESRCH.
    let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if ret != 0 {
        debug!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "engine process group already gone"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) {}

/// Forward every line of `stream` as an event until EOF or until the
/// receiver goes away.
async fn pump_lines<R, F>(stream: R, tx: mpsc::Sender<EngineEvent>, to_event: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> EngineEvent,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_string();
                if tx.send(to_event(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "engine stream read failed");
                break;
            }
        }
    }
}

/// Map a stdout line to an event using the engine's stream prefixes.
pub fn classify_stdout(line: String) -> EngineEvent {
    if let Some(rest) = line.strip_prefix("WARNING: ") {
        EngineEvent::Warning(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("VERBOSE: ") {
        EngineEvent::Verbose(rest.to_string())
    } else if let Some(rest) = line.strip_prefix("DEBUG: ") {
        EngineEvent::Debug(rest.to_string())
    } else {
        EngineEvent::Output(line)
    }
}
