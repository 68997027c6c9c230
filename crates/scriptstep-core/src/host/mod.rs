//! Host bridge: the interactive-host contract a scripting engine expects,
//! implemented on top of the build log and the failure policy.
//!
//! # Modules
//!
//! - [`types`]: progress records, prompt descriptions and secrets
//! - [`ui`]: `HostUi` trait, `NonInteractive` prompts, `NullRawUi`,
//!   and `BuildHostUi`

pub mod types;
pub mod ui;

use std::sync::{Arc, Mutex};

use uuid::Uuid;

pub use types::{
    ChoiceDescription, ConsoleColor, Coordinates, Credential, FieldDescription, ProgressRecord,
    SecretString, Size,
};
pub use ui::{BuildHostUi, HostUi, InteractivePrompts, NonInteractive, NullRawUi, RawUi};

/// Host name reported to the engine.
pub const HOST_NAME: &str = "ScriptStepHost";

/// The host an engine session runs against.
pub struct BuildHost {
    instance_id: Uuid,
    ui: Arc<dyn HostUi>,
    exit_code: Mutex<Option<i32>>,
}

impl BuildHost {
    pub fn new(ui: Arc<dyn HostUi>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            ui,
            exit_code: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        HOST_NAME
    }

    pub fn version(&self) -> &str {
        crate::VERSION
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn ui(&self) -> &dyn HostUi {
        self.ui.as_ref()
    }

    /// Record the exit code the script asked the host to exit with.
    pub fn set_should_exit(&self, exit_code: i32) {
        *self
            .exit_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(exit_code);
    }

    pub fn requested_exit_code(&self) -> Option<i32> {
        *self
            .exit_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for BuildHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHost")
            .field("name", &HOST_NAME)
            .field("instance_id", &self.instance_id)
            .field("exit_code", &self.requested_exit_code())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryLogSink, MemoryStatusSink};
    use crate::policy::{DrainStrategy, ExecutionPolicy, FailurePolicy};
    use crate::sink::Importance;

    fn host() -> BuildHost {
        let policy = Arc::new(FailurePolicy::new(
            ExecutionPolicy::default(),
            DrainStrategy::Streaming,
            Importance::High,
            Arc::new(MemoryLogSink::new()),
            Arc::new(MemoryStatusSink::new()),
        ));
        BuildHost::new(Arc::new(BuildHostUi::new(Importance::High, policy)))
    }

    #[test]
    fn test_host_identity() {
        let a = host();
        let b = host();
        assert_eq!(a.name(), HOST_NAME);
        assert_eq!(a.version(), crate::VERSION);
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn test_set_should_exit_records_code() {
        let host = host();
        assert_eq!(host.requested_exit_code(), None);
        host.set_should_exit(3);
        assert_eq!(host.requested_exit_code(), Some(3));
    }
}
