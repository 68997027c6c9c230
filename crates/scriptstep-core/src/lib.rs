//! scriptstep core library
//!
//! Runs one script per build step through an external scripting engine,
//! bridges the engine's host callbacks into the build log, and applies the
//! configured failure policy to the errors it raises.

pub mod config;
pub mod context;
pub mod controller;
pub mod engine;
mod error;
pub mod fakes;
pub mod host;
pub mod obs;
pub mod policy;
pub mod resolver;
pub mod sink;
pub mod step;
pub mod telemetry;

pub use config::{EngineConfig, StepConfig, WorkspaceMapping};

pub use context::{
    compute_context, derive_branch_name, parse_git_source_version, BuildDetail, CiContext,
    EnvMap, SourceProvider,
};

pub use controller::{
    ControllerOptions, ExecutionController, ExecutionState, OutputRecord, RecordStream,
};

pub use engine::{Dialect, EngineEvent, EngineSession, ProcessEngine, ScriptEngine};

pub use error::{HostError, Result, StepError};

pub use host::{BuildHost, BuildHostUi, HostUi};

pub use policy::{DrainStrategy, ExecutionPolicy, FailurePolicy, AGGREGATE_FAILURE_MESSAGE};

pub use resolver::{MappedWorkspace, ResolvedCommand, ScriptResolver, ScriptSource, Workspace};

pub use sink::{
    BuildPhase, BuildStatusFile, BuildStatusSink, Importance, JsonFileStatusSink, LoggingSink,
    PhaseStatus, TracingLogSink,
};

pub use step::{ScriptStep, StepReport};

pub use obs::StepSpan;
pub use telemetry::init_tracing;

/// scriptstep version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
