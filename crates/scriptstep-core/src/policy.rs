//! Failure policy: decides what an error record coming out of the engine
//! does to the build.
//!
//! The policy flags are fixed for one activation. [`FailurePolicy`] carries
//! the mutable part (error counter) and is shared between the host bridge,
//! which reports errors as the engine produces them, and the controller,
//! which runs the end-of-run check.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepError};
use crate::obs::{emit_build_failing, emit_phase_failed};
use crate::sink::{BuildPhase, BuildStatusSink, Importance, LoggingSink};

/// Message raised when an aggregated run saw at least one error.
pub const AGGREGATE_FAILURE_MESSAGE: &str = "There were errors. Failing the build...";

/// Policy flags for one activation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Mark the build phase failed and fail the step when the script errors.
    pub fail_build_on_error: bool,
    /// Abort on the first error instead of after the engine finishes.
    /// Only meaningful together with `fail_build_on_error`.
    pub fail_build_on_first_error: bool,
    /// Route warnings through the error path.
    pub treat_warnings_as_errors: bool,
    /// Demote errors to warnings; they never count toward failure.
    pub ignore_exceptions: bool,
    /// Errors fail the test phase instead of the compilation phase.
    pub is_test_phase: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            fail_build_on_error: true,
            fail_build_on_first_error: false,
            treat_warnings_as_errors: false,
            ignore_exceptions: false,
            is_test_phase: false,
        }
    }
}

impl ExecutionPolicy {
    /// The phase an error fails.
    pub fn phase(&self) -> BuildPhase {
        if self.is_test_phase {
            BuildPhase::Test
        } else {
            BuildPhase::Compilation
        }
    }
}

/// How error records are evaluated while the engine runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrainStrategy {
    /// Every error is evaluated as it arrives; `fail_build_on_first_error`
    /// aborts the session on the first one.
    #[default]
    Streaming,
    /// Errors are logged and counted while the engine runs, and the failure
    /// decision is taken once after completion. First-error abort is never
    /// honoured in this mode.
    Deferred,
}

impl std::str::FromStr for DrainStrategy {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" => Ok(DrainStrategy::Streaming),
            "deferred" => Ok(DrainStrategy::Deferred),
            other => Err(StepError::Config(format!("unknown drain strategy: {other}"))),
        }
    }
}

/// Per-activation failure policy evaluator.
pub struct FailurePolicy {
    policy: ExecutionPolicy,
    strategy: DrainStrategy,
    warning_importance: Importance,
    log: Arc<dyn LoggingSink>,
    status: Arc<dyn BuildStatusSink>,
    error_count: AtomicU64,
    saw_error: AtomicBool,
}

impl FailurePolicy {
    pub fn new(
        policy: ExecutionPolicy,
        strategy: DrainStrategy,
        warning_importance: Importance,
        log: Arc<dyn LoggingSink>,
        status: Arc<dyn BuildStatusSink>,
    ) -> Self {
        Self {
            policy,
            strategy,
            warning_importance,
            log,
            status,
            error_count: AtomicU64::new(0),
            saw_error: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn strategy(&self) -> DrainStrategy {
        self.strategy
    }

    pub fn log(&self) -> &Arc<dyn LoggingSink> {
        &self.log
    }

    /// Number of errors that counted toward failure.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn saw_error(&self) -> bool {
        self.saw_error.load(Ordering::SeqCst)
    }

    /// Evaluate one error record.
    ///
    /// Returns `Err(FailingBuild)` only for a first-error abort; every other
    /// outcome is recorded and execution continues.
    pub fn report_error(&self, message: &str) -> Result<()> {
        if self.policy.ignore_exceptions {
            self.log.warning(message, self.warning_importance);
            return Ok(());
        }

        self.error_count.fetch_add(1, Ordering::SeqCst);
        self.saw_error.store(true, Ordering::SeqCst);

        if self.policy.fail_build_on_error {
            self.fail_phase()?;
            if self.policy.fail_build_on_first_error && self.strategy == DrainStrategy::Streaming
            {
                self.log.error(message);
                emit_build_failing(&message);
                return Err(StepError::FailingBuild(message.to_string()));
            }
        }

        self.log.error(message);
        Ok(())
    }

    /// Evaluate one warning record.
    pub fn report_warning(&self, message: &str) -> Result<()> {
        if self.policy.treat_warnings_as_errors {
            return self.report_error(message);
        }
        self.log.warning(message, self.warning_importance);
        Ok(())
    }

    /// End-of-run check: fail the build once if any error counted.
    pub fn finish(&self) -> Result<()> {
        if self.policy.fail_build_on_error && self.error_count() > 0 {
            emit_build_failing(&AGGREGATE_FAILURE_MESSAGE);
            return Err(StepError::FailingBuild(
                AGGREGATE_FAILURE_MESSAGE.to_string(),
            ));
        }
        Ok(())
    }

    fn fail_phase(&self) -> Result<()> {
        let phase = self.policy.phase();
        self.status.mark_phase_failed(phase);
        self.status.persist()?;
        emit_phase_failed(phase);
        Ok(())
    }
}

impl std::fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailurePolicy")
            .field("policy", &self.policy)
            .field("strategy", &self.strategy)
            .field("error_count", &self.error_count())
            .finish()
    }
}
