//! Host user interface: the write/prompt surface a scripting engine calls
//! back into, and its build-log implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HostError, Result};
use crate::policy::FailurePolicy;
use crate::sink::{Importance, LoggingSink};

use super::types::{
    ChoiceDescription, ConsoleColor, Coordinates, Credential, FieldDescription, ProgressRecord,
    SecretString, Size,
};

/// Prompt operations of the host contract.
pub trait InteractivePrompts: Send + Sync {
    fn prompt(
        &self,
        caption: &str,
        message: &str,
        fields: &[FieldDescription],
    ) -> HashMap<String, String>;

    fn prompt_for_choice(
        &self,
        caption: &str,
        message: &str,
        choices: &[ChoiceDescription],
        default_choice: usize,
    ) -> usize;

    fn prompt_for_credential(
        &self,
        caption: &str,
        message: &str,
        user_name: &str,
        target_name: &str,
    ) -> Option<Credential>;

    fn read_line(&self) -> String;

    fn read_line_as_secure(&self) -> Option<SecretString>;
}

/// Prompts for an unattended build: every call returns at once with an
/// empty or default answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl InteractivePrompts for NonInteractive {
    fn prompt(
        &self,
        _caption: &str,
        _message: &str,
        _fields: &[FieldDescription],
    ) -> HashMap<String, String> {
        HashMap::new()
    }

    fn prompt_for_choice(
        &self,
        _caption: &str,
        _message: &str,
        choices: &[ChoiceDescription],
        default_choice: usize,
    ) -> usize {
        if default_choice < choices.len() {
            default_choice
        } else {
            0
        }
    }

    fn prompt_for_credential(
        &self,
        _caption: &str,
        _message: &str,
        _user_name: &str,
        _target_name: &str,
    ) -> Option<Credential> {
        None
    }

    fn read_line(&self) -> String {
        String::new()
    }

    fn read_line_as_secure(&self) -> Option<SecretString> {
        None
    }
}

/// Low-level terminal surface of the host contract.
pub trait RawUi: Send + Sync {
    fn buffer_size(&self) -> Size;
    fn window_size(&self) -> Size;
    fn cursor_position(&self) -> Coordinates;
    fn set_cursor_position(&self, position: Coordinates);
    fn window_title(&self) -> String;
    fn set_window_title(&self, title: &str);
}

/// Raw UI placeholder for hosts without a terminal. Setters are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRawUi;

impl RawUi for NullRawUi {
    fn buffer_size(&self) -> Size {
        Size {
            width: 120,
            height: 50,
        }
    }

    fn window_size(&self) -> Size {
        self.buffer_size()
    }

    fn cursor_position(&self) -> Coordinates {
        Coordinates::default()
    }

    fn set_cursor_position(&self, _position: Coordinates) {}

    fn window_title(&self) -> String {
        String::new()
    }

    fn set_window_title(&self, _title: &str) {}
}

/// The host user interface contract.
///
/// Error and warning writes return `Result` because the failure policy may
/// decide to abort the run from inside the callback.
pub trait HostUi: Send + Sync {
    fn raw_ui(&self) -> &dyn RawUi;
    fn prompts(&self) -> &dyn InteractivePrompts;

    fn write(&self, text: &str);
    fn write_colored(&self, foreground: ConsoleColor, background: ConsoleColor, text: &str);
    fn write_line(&self, text: &str);
    fn write_line_colored(&self, foreground: ConsoleColor, background: ConsoleColor, text: &str);
    fn write_newline(&self);

    fn write_warning_line(&self, text: &str) -> Result<()>;
    fn write_error_line(&self, text: &str) -> Result<()>;
    fn write_debug_line(&self, text: &str);
    fn write_verbose_line(&self, text: &str);

    /// Report progress. A missing record is a contract violation.
    fn write_progress(&self, source_id: i64, record: Option<&ProgressRecord>) -> Result<()>;
}

/// Host UI that writes into the build log.
///
/// Plain output goes to the logging sink at the configured message
/// importance; errors and warnings go through the [`FailurePolicy`].
pub struct BuildHostUi {
    message_importance: Importance,
    log: Arc<dyn LoggingSink>,
    policy: Arc<FailurePolicy>,
    prompts: NonInteractive,
    raw: NullRawUi,
}

impl BuildHostUi {
    pub fn new(message_importance: Importance, policy: Arc<FailurePolicy>) -> Self {
        Self {
            message_importance,
            log: policy.log().clone(),
            policy,
            prompts: NonInteractive,
            raw: NullRawUi,
        }
    }

    pub fn policy(&self) -> &Arc<FailurePolicy> {
        &self.policy
    }

    fn message(&self, text: &str) {
        self.log.message(text, self.message_importance);
    }
}

impl HostUi for BuildHostUi {
    fn raw_ui(&self) -> &dyn RawUi {
        &self.raw
    }

    fn prompts(&self) -> &dyn InteractivePrompts {
        &self.prompts
    }

    fn write(&self, text: &str) {
        self.message(text);
    }

    fn write_colored(&self, _foreground: ConsoleColor, _background: ConsoleColor, text: &str) {
        self.message(text);
    }

    fn write_line(&self, text: &str) {
        if !text.is_empty() {
            self.message(text);
        }
    }

    fn write_line_colored(&self, _foreground: ConsoleColor, _background: ConsoleColor, text: &str) {
        self.write_line(text);
    }

    fn write_newline(&self) {
        self.message("\n");
    }

    fn write_warning_line(&self, text: &str) -> Result<()> {
        self.policy.report_warning(text)
    }

    fn write_error_line(&self, text: &str) -> Result<()> {
        self.policy.report_error(text)
    }

    fn write_debug_line(&self, text: &str) {
        self.log.message(text, Importance::Low);
    }

    fn write_verbose_line(&self, text: &str) {
        self.log.message(text, Importance::Low);
    }

    fn write_progress(&self, _source_id: i64, record: Option<&ProgressRecord>) -> Result<()> {
        let record = record.ok_or(HostError::ArgumentNull("record"))?;
        self.log.message(
            &format!(
                "{} Progress {}% Complete",
                record.current_operation, record.percent_complete
            ),
            Importance::Normal,
        );
        Ok(())
    }
}

impl std::fmt::Debug for BuildHostUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHostUi")
            .field("message_importance", &self.message_importance)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::fakes::{LogEntry, MemoryLogSink, MemoryStatusSink};
    use crate::policy::{DrainStrategy, ExecutionPolicy};

    fn build_ui(policy: ExecutionPolicy) -> (BuildHostUi, Arc<MemoryLogSink>) {
        let log = Arc::new(MemoryLogSink::new());
        let status = Arc::new(MemoryStatusSink::new());
        let failure = Arc::new(FailurePolicy::new(
            policy,
            DrainStrategy::Streaming,
            Importance::Normal,
            log.clone(),
            status,
        ));
        (BuildHostUi::new(Importance::High, failure), log)
    }

    #[test]
    fn test_writes_forward_at_message_importance() {
        let (ui, log) = build_ui(ExecutionPolicy::default());

        ui.write("partial");
        ui.write_colored(ConsoleColor::Red, ConsoleColor::Black, "colored");
        ui.write_line("line");
        ui.write_line_colored(ConsoleColor::Green, ConsoleColor::Black, "green line");

        assert_eq!(
            log.entries(),
            vec![
                LogEntry::Message("partial".to_string(), Importance::High),
                LogEntry::Message("colored".to_string(), Importance::High),
                LogEntry::Message("line".to_string(), Importance::High),
                LogEntry::Message("green line".to_string(), Importance::High),
            ]
        );
    }

    #[test]
    fn test_empty_write_line_is_skipped_but_newline_emits() {
        let (ui, log) = build_ui(ExecutionPolicy::default());

        ui.write_line("");
        assert!(log.entries().is_empty());

        ui.write_newline();
        assert_eq!(
            log.entries(),
            vec![LogEntry::Message("\n".to_string(), Importance::High)]
        );
    }

    #[test]
    fn test_debug_and_verbose_are_low_importance() {
        let (ui, log) = build_ui(ExecutionPolicy::default());

        ui.write_debug_line("dbg");
        ui.write_verbose_line("verbose");

        assert_eq!(
            log.entries(),
            vec![
                LogEntry::Message("dbg".to_string(), Importance::Low),
                LogEntry::Message("verbose".to_string(), Importance::Low),
            ]
        );
    }

    #[test]
    fn test_error_line_goes_through_policy() {
        let (ui, log) = build_ui(ExecutionPolicy {
            fail_build_on_first_error: true,
            ..Default::default()
        });

        let err = ui.write_error_line("broken").unwrap_err();
        assert!(matches!(err, StepError::FailingBuild(_)));
        assert_eq!(ui.policy().error_count(), 1);
        assert_eq!(log.errors(), vec!["broken".to_string()]);
    }

    #[test]
    fn test_warning_line_uses_warning_importance() {
        let (ui, log) = build_ui(ExecutionPolicy::default());

        ui.write_warning_line("heads up").unwrap();
        assert_eq!(
            log.entries(),
            vec![LogEntry::Warning("heads up".to_string(), Importance::Normal)]
        );
    }

    #[test]
    fn test_progress_message_format() {
        let (ui, log) = build_ui(ExecutionPolicy::default());
        let record = ProgressRecord::new("Deploy", "Copying files", 42);

        ui.write_progress(1, Some(&record)).unwrap();
        assert_eq!(
            log.entries(),
            vec![LogEntry::Message(
                "Copying files Progress 42% Complete".to_string(),
                Importance::Normal
            )]
        );
    }

    #[test]
    fn test_progress_without_record_is_argument_null() {
        let (ui, log) = build_ui(ExecutionPolicy::default());

        let err = ui.write_progress(1, None).unwrap_err();
        assert!(matches!(
            err,
            StepError::Host(HostError::ArgumentNull("record"))
        ));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_prompts_return_defaults_immediately() {
        let (ui, _log) = build_ui(ExecutionPolicy::default());
        let prompts = ui.prompts();

        let fields = vec![FieldDescription {
            name: "Name".to_string(),
            label: "Name".to_string(),
            default_value: Some("x".to_string()),
        }];
        assert!(prompts.prompt("caption", "message", &fields).is_empty());

        let choices = vec![
            ChoiceDescription {
                label: "&Yes".to_string(),
                help_message: String::new(),
            },
            ChoiceDescription {
                label: "&No".to_string(),
                help_message: String::new(),
            },
        ];
        assert_eq!(prompts.prompt_for_choice("c", "m", &choices, 1), 1);
        assert_eq!(prompts.prompt_for_choice("c", "m", &choices, 7), 0);
        assert!(prompts
            .prompt_for_credential("c", "m", "user", "target")
            .is_none());
        assert_eq!(prompts.read_line(), "");
        assert!(prompts.read_line_as_secure().is_none());
    }

    #[test]
    fn test_raw_ui_ignores_changes() {
        let (ui, _log) = build_ui(ExecutionPolicy::default());
        let raw = ui.raw_ui();

        raw.set_window_title("build");
        raw.set_cursor_position(Coordinates { x: 3, y: 4 });
        assert_eq!(raw.window_title(), "");
        assert_eq!(raw.cursor_position(), Coordinates::default());
        assert_eq!(raw.buffer_size().width, 120);
    }
}
