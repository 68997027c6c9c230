//! Execution controller: runs one resolved command through an engine
//! session and applies the failure policy to what comes back.
//!
//! The controller owns the session for a single activation. Events are
//! dispatched to the host bridge as they arrive; completion is awaited on
//! the session's event stream with an optional timeout. The session is shut
//! down on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::EnvMap;
use crate::engine::{EngineEvent, EngineSession, ScriptEngine};
use crate::error::{Result, StepError};
use crate::host::BuildHost;
use crate::obs::{emit_script_resolved, emit_session_finished, emit_session_started};
use crate::policy::FailurePolicy;
use crate::resolver::{ResolvedCommand, ScriptResolver};
use crate::sink::Importance;

/// Lifecycle of one activation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Resolving,
    /// Session open; records are dispatched to the host as they arrive.
    Running,
    /// Engine exited and session shut down; the aggregate check runs.
    Draining,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }
}

/// Stream an output record was produced on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStream {
    Output,
    Error,
}

/// A line captured from the engine, numbered in arrival order.
///
/// Order is exact within one stream. Engines that read output and error
/// streams independently may interleave the two differently from how the
/// script wrote them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputRecord {
    pub seq: u64,
    pub stream: RecordStream,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Abort the session when it runs longer than this. `None` waits until
    /// the engine finishes.
    pub timeout: Option<Duration>,
}

/// Drives one activation from resolution to completion.
pub struct ExecutionController {
    engine: Arc<dyn ScriptEngine>,
    policy: Arc<FailurePolicy>,
    options: ControllerOptions,
    state: ExecutionState,
    exit_code: Option<i32>,
}

impl ExecutionController {
    pub fn new(
        engine: Arc<dyn ScriptEngine>,
        policy: Arc<FailurePolicy>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            engine,
            policy,
            options,
            state: ExecutionState::Idle,
            exit_code: None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn policy(&self) -> &Arc<FailurePolicy> {
        &self.policy
    }

    /// Exit code reported by the engine, once it has exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!(from = ?self.state, to = ?next, "execution state");
        self.state = next;
    }

    /// Resolve a script reference. Failure ends the activation.
    pub fn resolve<F>(
        &mut self,
        resolver: &ScriptResolver<'_>,
        raw_script: &str,
        arguments: &str,
        lookup: F,
    ) -> Result<ResolvedCommand>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.ensure_idle()?;
        self.transition(ExecutionState::Resolving);

        match resolver.resolve_with_env(raw_script, arguments, lookup) {
            Ok(command) => {
                self.policy.log().message(
                    &format!("Script resolved to {}", command.executable_text()),
                    Importance::Low,
                );
                emit_script_resolved(command.source().kind(), &command.digest());
                Ok(command)
            }
            Err(e) => {
                self.transition(ExecutionState::Failed);
                Err(e)
            }
        }
    }

    /// Run `command` with `env` in a fresh engine session.
    ///
    /// Returns the captured output and error records in arrival order, or
    /// the error that ended the activation.
    pub async fn execute(
        &mut self,
        command: ResolvedCommand,
        env: &EnvMap,
        host: &BuildHost,
    ) -> Result<Vec<OutputRecord>> {
        if self.state != ExecutionState::Resolving {
            self.ensure_idle()?;
        }
        self.transition(ExecutionState::Running);
        let started = Instant::now();

        let mut session = match self.engine.open_session(&command, env).await {
            Ok(session) => session,
            Err(e) => {
                self.transition(ExecutionState::Failed);
                return Err(e);
            }
        };
        emit_session_started(self.engine.name(), env.len());

        let mut records = Vec::new();
        let outcome = match self.options.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.pump(session.as_mut(), host, &mut records))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StepError::Timeout {
                        limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }),
                }
            }
            None => self.pump(session.as_mut(), host, &mut records).await,
        };

        session.shutdown().await;

        let outcome = outcome.and_then(|()| {
            self.transition(ExecutionState::Draining);
            self.policy.finish()
        });

        emit_session_finished(
            self.engine.name(),
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            records.len(),
            self.policy.error_count(),
            self.exit_code,
        );

        match outcome {
            Ok(()) => {
                self.transition(ExecutionState::Completed);
                Ok(records)
            }
            Err(e) => {
                self.transition(ExecutionState::Failed);
                Err(e)
            }
        }
    }

    /// Dispatch events until the engine exits or the policy aborts.
    async fn pump(
        &mut self,
        session: &mut dyn EngineSession,
        host: &BuildHost,
        records: &mut Vec<OutputRecord>,
    ) -> Result<()> {
        let ui = host.ui();
        while let Some(event) = session.next_event().await {
            match event {
                EngineEvent::Output(text) => {
                    if text.is_empty() {
                        ui.write_newline();
                    } else {
                        ui.write_line(&text);
                    }
                    push_record(records, RecordStream::Output, text);
                }
                EngineEvent::Error(text) => {
                    push_record(records, RecordStream::Error, text.clone());
                    ui.write_error_line(&text)?;
                }
                EngineEvent::Warning(text) => ui.write_warning_line(&text)?,
                EngineEvent::Verbose(text) => ui.write_verbose_line(&text),
                EngineEvent::Debug(text) => ui.write_debug_line(&text),
                EngineEvent::Progress { source_id, record } => {
                    ui.write_progress(source_id, record.as_ref())?
                }
                EngineEvent::ExitRequested(code) => {
                    debug!(exit_code = code, "script requested host exit");
                    host.set_should_exit(code);
                }
                EngineEvent::Exited(code) => {
                    self.exit_code = code;
                    break;
                }
                EngineEvent::Faulted(reason) => return Err(StepError::Engine(reason)),
            }
        }

        if let Some(code) = self.exit_code.filter(|code| *code != 0) {
            let text = format!("Script exited with code {code}");
            push_record(records, RecordStream::Error, text.clone());
            ui.write_error_line(&text)?;
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state == ExecutionState::Idle {
            Ok(())
        } else {
            Err(StepError::Engine(format!(
                "controller cannot start a new activation in state {:?}",
                self.state
            )))
        }
    }
}

fn push_record(records: &mut Vec<OutputRecord>, stream: RecordStream, text: String) {
    records.push(OutputRecord {
        seq: records.len() as u64,
        stream,
        text,
        timestamp: Utc::now(),
    });
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("options", &self.options)
            .finish()
    }
}
