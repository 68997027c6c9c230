//! Error taxonomy for script steps.

/// Errors raised by the interactive-host contract.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("argument must not be null: {0}")]
    ArgumentNull(&'static str),
}

/// Script step errors.
///
/// Engine-side script errors never show up here directly: they are surfaced
/// as error records and pass through the failure policy, which raises
/// [`StepError::FailingBuild`] when the build must fail.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("script reference must not be empty")]
    EmptyScript,

    #[error("workspace local path [{}] for source path [{server_path}] was not found", .local_path.as_deref().unwrap_or("<unmapped>"))]
    ScriptNotFound {
        server_path: String,
        local_path: Option<String>,
    },

    #[error("could not find branch")]
    BranchNotFound,

    #[error("failing build: {0}")]
    FailingBuild(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("script timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepError {
    /// Whether this error was raised by the failure policy rather than by a
    /// fault in resolution or in the engine.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, StepError::FailingBuild(_))
    }
}

/// Result type for script step operations.
pub type Result<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_not_found_display() {
        let err = StepError::ScriptNotFound {
            server_path: "$/Proj/build.ps1".to_string(),
            local_path: Some("/src/build.ps1".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("$/Proj/build.ps1"));
        assert!(msg.contains("/src/build.ps1"));

        let err = StepError::ScriptNotFound {
            server_path: "$/Proj/build.ps1".to_string(),
            local_path: None,
        };
        assert!(err.to_string().contains("<unmapped>"));
    }

    #[test]
    fn test_failing_build_is_build_failure() {
        assert!(StepError::FailingBuild("boom".to_string()).is_build_failure());
        assert!(!StepError::EmptyScript.is_build_failure());
        assert!(!StepError::Engine("spawn".to_string()).is_build_failure());
    }

    #[test]
    fn test_host_error_converts() {
        let err: StepError = HostError::ArgumentNull("record").into();
        assert!(err.to_string().contains("record"));
    }
}
