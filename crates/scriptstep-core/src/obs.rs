//! Structured observability hooks for the script step lifecycle.
//!
//! Every activation runs inside a [`StepSpan`]; the `emit_*` functions log
//! the lifecycle milestones at `info!` (failures at `warn!`) so that build
//! agents can follow a step from resolution to completion.

use tracing::info;

use crate::sink::BuildPhase;

/// RAII guard that enters an activation-scoped span.
///
/// ```ignore
/// let _span = StepSpan::enter("3f0c...");
/// // every event below carries activation_id = "3f0c..."
/// ```
pub struct StepSpan {
    _span: tracing::span::EnteredSpan,
}

impl StepSpan {
    /// Create and enter a span tagged with the activation id.
    pub fn enter(activation_id: &str) -> Self {
        let span = tracing::info_span!("scriptstep.step", activation_id = %activation_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: script reference resolved to an executable command.
pub fn emit_script_resolved(source_kind: &str, command_digest: &str) {
    info!(
        event = "script.resolved",
        source_kind = %source_kind,
        command_digest = %command_digest,
    );
}

/// Emit event: engine session opened.
pub fn emit_session_started(engine: &str, env_vars: usize) {
    info!(event = "session.started", engine = %engine, env_vars = env_vars);
}

/// Emit event: engine session finished, with record and error counts.
pub fn emit_session_finished(
    engine: &str,
    duration_ms: u64,
    records: usize,
    errors: u64,
    exit_code: Option<i32>,
) {
    info!(
        event = "session.finished",
        engine = %engine,
        duration_ms = duration_ms,
        records = records,
        errors = errors,
        exit_code = ?exit_code,
    );
}

/// Emit event: a build phase was marked failed.
pub fn emit_phase_failed(phase: BuildPhase) {
    tracing::warn!(event = "phase.failed", phase = %phase);
}

/// Emit event: the failure policy is failing the build.
pub fn emit_build_failing(reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "build.failing", reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_step_span_enter() {
        let _span = StepSpan::enter("test-activation");
    }

    #[traced_test]
    #[test]
    fn test_events_carry_names_and_fields() {
        let _span = StepSpan::enter("act-42");
        emit_script_resolved("local_file", "abc123");
        emit_phase_failed(BuildPhase::Compilation);

        assert!(logs_contain("script.resolved"));
        assert!(logs_contain("source_kind=local_file"));
        assert!(logs_contain("act-42"));
        assert!(logs_contain("phase.failed"));
        assert!(logs_contain("phase=compilation"));
    }

    #[traced_test]
    #[test]
    fn test_build_failing_event() {
        emit_build_failing(&"boom");
        assert!(logs_contain("build.failing"));
        assert!(logs_contain("boom"));
    }
}
