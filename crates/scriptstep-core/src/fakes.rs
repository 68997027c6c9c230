//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryLogSink`, `MemoryStatusSink` and `ScriptedEngine` that
//! satisfy the trait contracts without a build server or a real engine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::EnvMap;
use crate::engine::{Dialect, EngineEvent, EngineSession, ScriptEngine};
use crate::error::{Result, StepError};
use crate::resolver::ResolvedCommand;
use crate::sink::{BuildPhase, BuildStatusSink, Importance, LoggingSink, PhaseStatus};

// ---------------------------------------------------------------------------
// MemoryLogSink
// ---------------------------------------------------------------------------

/// One entry written to a [`MemoryLogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Message(String, Importance),
    Warning(String, Importance),
    Error(String),
}

/// Logging sink that records every entry in order.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Message(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Warning(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                LogEntry::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl LoggingSink for MemoryLogSink {
    fn message(&self, text: &str, importance: Importance) {
        self.entries
            .lock()
            .unwrap()
            .push(LogEntry::Message(text.to_string(), importance));
    }

    fn warning(&self, text: &str, importance: Importance) {
        self.entries
            .lock()
            .unwrap()
            .push(LogEntry::Warning(text.to_string(), importance));
    }

    fn error(&self, text: &str) {
        self.entries
            .lock()
            .unwrap()
            .push(LogEntry::Error(text.to_string()));
    }
}

// ---------------------------------------------------------------------------
// MemoryStatusSink
// ---------------------------------------------------------------------------

/// Status sink keeping phase status in memory and counting `persist` calls.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    phases: Mutex<HashMap<BuildPhase, PhaseStatus>>,
    persisted: AtomicUsize,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, phase: BuildPhase) -> PhaseStatus {
        self.phases
            .lock()
            .unwrap()
            .get(&phase)
            .copied()
            .unwrap_or_default()
    }

    pub fn persist_count(&self) -> usize {
        self.persisted.load(Ordering::SeqCst)
    }
}

impl BuildStatusSink for MemoryStatusSink {
    fn mark_phase_failed(&self, phase: BuildPhase) {
        self.phases
            .lock()
            .unwrap()
            .insert(phase, PhaseStatus::Failed);
    }

    fn persist(&self) -> Result<()> {
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

/// Engine that replays a fixed list of events for every session.
///
/// A session ends after the last event unless the engine is `hanging`, in
/// which case it never completes on its own (for timeout tests).
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    events: Vec<EngineEvent>,
    delay: Option<Duration>,
    hang: bool,
    open_error: Option<String>,
    dialect: Dialect,
    opened: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
    delivered: Arc<AtomicUsize>,
    last_env: Mutex<Option<EnvMap>>,
    last_command: Mutex<Option<ResolvedCommand>>,
}

impl ScriptedEngine {
    pub fn new(events: Vec<EngineEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    /// Wait `delay` before delivering each event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep the session open after the last event.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail `open_session` with an engine error.
    pub fn failing_to_open(mut self, message: &str) -> Self {
        self.open_error = Some(message.to_string());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Events handed to the controller across all sessions.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn last_env(&self) -> Option<EnvMap> {
        self.last_env.lock().unwrap().clone()
    }

    pub fn last_command(&self) -> Option<ResolvedCommand> {
        self.last_command.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn open_session(
        &self,
        command: &ResolvedCommand,
        env: &EnvMap,
    ) -> Result<Box<dyn EngineSession>> {
        if let Some(message) = &self.open_error {
            return Err(StepError::Engine(message.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_env.lock().unwrap() = Some(env.clone());
        *self.last_command.lock().unwrap() = Some(command.clone());

        Ok(Box::new(ScriptedSession {
            queue: self.events.iter().cloned().collect(),
            delay: self.delay,
            hang: self.hang,
            closed: false,
            shutdowns: self.shutdowns.clone(),
            delivered: self.delivered.clone(),
        }))
    }
}

struct ScriptedSession {
    queue: VecDeque<EngineEvent>,
    delay: Option<Duration>,
    hang: bool,
    closed: bool,
    shutdowns: Arc<AtomicUsize>,
    delivered: Arc<AtomicUsize>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<EngineEvent> {
        if self.closed {
            return None;
        }
        match self.queue.pop_front() {
            Some(event) => {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.delivered.fetch_add(1, Ordering::SeqCst);
                Some(event)
            }
            None if self.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}
