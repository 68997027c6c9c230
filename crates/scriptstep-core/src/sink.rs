//! Build logging and build status collaborators.
//!
//! The build engine that hosts a script step owns the real log and the
//! persisted phase status. The step only sees them through [`LoggingSink`]
//! and [`BuildStatusSink`]; both may be called from the engine's reader
//! tasks, so implementations must be `Send + Sync`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StepError};

/// Verbosity of a build message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Importance {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Importance::Low),
            "normal" => Ok(Importance::Normal),
            "high" => Ok(Importance::High),
            other => Err(StepError::Config(format!("unknown importance: {other}"))),
        }
    }
}

/// Build phase whose status a failing script marks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Compilation,
    Test,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildPhase::Compilation => f.write_str("compilation"),
            BuildPhase::Test => f.write_str("test"),
        }
    }
}

/// Persisted status of a single build phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Unknown,
    Succeeded,
    Failed,
}

/// Receives messages, warnings and errors for the build log.
pub trait LoggingSink: Send + Sync {
    fn message(&self, text: &str, importance: Importance);
    fn warning(&self, text: &str, importance: Importance);
    fn error(&self, text: &str);
}

/// Receives build phase status changes.
///
/// `mark_phase_failed` must be idempotent: the failure policy calls it once
/// per error record.
pub trait BuildStatusSink: Send + Sync {
    fn mark_phase_failed(&self, phase: BuildPhase);
    fn persist(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TracingLogSink
// ---------------------------------------------------------------------------

/// Logging sink that writes the build log through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LoggingSink for TracingLogSink {
    fn message(&self, text: &str, importance: Importance) {
        match importance {
            Importance::Low => debug!(target: "build", importance = %importance, "{text}"),
            _ => info!(target: "build", importance = %importance, "{text}"),
        }
    }

    fn warning(&self, text: &str, importance: Importance) {
        warn!(target: "build", importance = %importance, "{text}");
    }

    fn error(&self, text: &str) {
        error!(target: "build", "{text}");
    }
}

// ---------------------------------------------------------------------------
// JsonFileStatusSink
// ---------------------------------------------------------------------------

/// Phase status snapshot written by [`JsonFileStatusSink`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BuildStatusFile {
    #[serde(default)]
    pub compilation_status: PhaseStatus,
    #[serde(default)]
    pub test_status: PhaseStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BuildStatusFile {
    pub fn status(&self, phase: BuildPhase) -> PhaseStatus {
        match phase {
            BuildPhase::Compilation => self.compilation_status,
            BuildPhase::Test => self.test_status,
        }
    }
}

/// Status sink that persists phase status to a JSON file.
///
/// An existing file is loaded on open so that statuses written by earlier
/// steps of the same build are kept.
#[derive(Debug)]
pub struct JsonFileStatusSink {
    path: PathBuf,
    state: Mutex<BuildStatusFile>,
}

impl JsonFileStatusSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            BuildStatusFile::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory snapshot (may be ahead of the file until `persist`).
    pub fn snapshot(&self) -> BuildStatusFile {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl BuildStatusSink for JsonFileStatusSink {
    fn mark_phase_failed(&self, phase: BuildPhase) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match phase {
            BuildPhase::Compilation => state.compilation_status = PhaseStatus::Failed,
            BuildPhase::Test => state.test_status = PhaseStatus::Failed,
        }
        state.updated_at = Some(Utc::now());
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
