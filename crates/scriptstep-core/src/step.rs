//! One script step activation: context → resolve → execute.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::config::StepConfig;
use crate::context::{compute_context, BuildDetail, EnvMap};
use crate::controller::{ControllerOptions, ExecutionController, OutputRecord, RecordStream};
use crate::engine::{ProcessEngine, ScriptEngine};
use crate::error::Result;
use crate::host::{BuildHost, BuildHostUi};
use crate::policy::FailurePolicy;
use crate::resolver::{ScriptResolver, Workspace};
use crate::sink::{BuildStatusSink, LoggingSink};

/// Summary of a completed activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub activation_id: String,
    pub engine: String,
    pub source_kind: String,
    pub command_digest: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    /// Exit code the script asked the host to exit with, if any.
    pub requested_exit_code: Option<i32>,
    /// Errors that counted toward failure.
    pub error_count: u64,
    pub records: Vec<OutputRecord>,
}

impl StepReport {
    pub fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.stream == RecordStream::Output)
            .map(|r| r.text.as_str())
    }

    pub fn error_lines(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter(|r| r.stream == RecordStream::Error)
            .map(|r| r.text.as_str())
    }
}

/// A configured script step, ready to run scripts.
///
/// Every call to [`ScriptStep::run`] is an independent activation with its
/// own failure policy, host and controller.
pub struct ScriptStep {
    config: StepConfig,
    engine: Arc<dyn ScriptEngine>,
    log: Arc<dyn LoggingSink>,
    status: Arc<dyn BuildStatusSink>,
    workspace: Option<Arc<dyn Workspace>>,
    build_detail: Option<BuildDetail>,
    extra_env: EnvMap,
}

impl ScriptStep {
    pub fn new(
        config: StepConfig,
        engine: Arc<dyn ScriptEngine>,
        log: Arc<dyn LoggingSink>,
        status: Arc<dyn BuildStatusSink>,
    ) -> Self {
        let workspace = config
            .workspace()
            .map(|ws| Arc::new(ws) as Arc<dyn Workspace>);
        Self {
            config,
            engine,
            log,
            status,
            workspace,
            build_detail: None,
            extra_env: EnvMap::new(),
        }
    }

    /// Step backed by the process engine described in `config.engine`.
    pub fn from_config(
        config: StepConfig,
        log: Arc<dyn LoggingSink>,
        status: Arc<dyn BuildStatusSink>,
    ) -> Self {
        let engine = Arc::new(ProcessEngine::new(config.engine.clone()));
        Self::new(config, engine, log, status)
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Expose CI variables derived from `detail` to every script.
    pub fn with_build_detail(mut self, detail: BuildDetail) -> Self {
        self.build_detail = Some(detail);
        self
    }

    /// Add a variable to the engine environment.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(name.into(), value.into());
        self
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Environment handed to the engine for one activation.
    pub fn environment(&self) -> Result<EnvMap> {
        let mut env = match &self.build_detail {
            Some(detail) => compute_context(detail)?.to_env(),
            None => EnvMap::new(),
        };
        env.extend(
            self.extra_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(env)
    }

    /// Run `script` with `arguments` as one activation.
    pub async fn run(&self, script: &str, arguments: &str) -> Result<StepReport> {
        let activation_id = Uuid::new_v4().to_string();
        self.run_activation(&activation_id, script, arguments).await
    }

    #[instrument(name = "scriptstep.step", skip(self, script, arguments), fields(engine = %self.engine.name()))]
    async fn run_activation(
        &self,
        activation_id: &str,
        script: &str,
        arguments: &str,
    ) -> Result<StepReport> {
        let started_at = Utc::now();
        let started = Instant::now();

        let policy = Arc::new(FailurePolicy::new(
            self.config.policy,
            self.config.drain,
            self.config.warning_importance,
            self.log.clone(),
            self.status.clone(),
        ));
        let host = BuildHost::new(Arc::new(BuildHostUi::new(
            self.config.message_importance,
            policy.clone(),
        )));
        let mut controller = ExecutionController::new(
            self.engine.clone(),
            policy.clone(),
            ControllerOptions {
                timeout: self.config.timeout(),
            },
        );

        let env = self.environment()?;
        let resolver =
            ScriptResolver::new(self.engine.dialect()).with_workspace(self.workspace.as_deref());
        let command = controller.resolve(&resolver, script, arguments, |name| {
            env.get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
        })?;

        let source_kind = command.source().kind().to_string();
        let command_digest = command.digest();
        let records = controller.execute(command, &env, &host).await?;

        Ok(StepReport {
            activation_id: activation_id.to_string(),
            engine: self.engine.name().to_string(),
            source_kind,
            command_digest,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            exit_code: controller.exit_code(),
            requested_exit_code: host.requested_exit_code(),
            error_count: policy.error_count(),
            records,
        })
    }
}

impl std::fmt::Debug for ScriptStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStep")
            .field("engine", &self.engine.name())
            .field("config", &self.config)
            .field("has_workspace", &self.workspace.is_some())
            .field("has_build_detail", &self.build_detail.is_some())
            .finish()
    }
}
