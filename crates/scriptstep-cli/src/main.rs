//! scriptstep - run a build script through an external scripting engine
//!
//! ## Commands
//!
//! - `run`: run one script as a build step and apply the failure policy
//! - `resolve`: show the command a script reference resolves to
//! - `branch`: print the source branch of a build

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use scriptstep_core::{
    derive_branch_name, BuildDetail, DrainStrategy, EngineConfig, Importance, JsonFileStatusSink,
    ScriptResolver, ScriptStep, StepConfig, StepSpan, TracingLogSink, Workspace,
    WorkspaceMapping,
};

#[derive(Parser)]
#[command(name = "scriptstep")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run build scripts through an external scripting engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script as a build step
    Run {
        /// Inline script text, a local script path, or a `$/` server path
        script: String,

        #[command(flatten)]
        step: StepArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Build detail JSON used to expose TF_BUILD_* variables
        #[arg(long, env = "SCRIPTSTEP_BUILD_DETAIL")]
        build_detail: Option<PathBuf>,

        /// Build status file updated when a phase fails
        #[arg(
            long,
            env = "SCRIPTSTEP_STATUS_FILE",
            default_value = ".scriptstep/build-status.json"
        )]
        status_file: PathBuf,

        /// Print the step report as JSON
        #[arg(long)]
        report_json: bool,
    },

    /// Show the command a script reference resolves to
    Resolve {
        /// Inline script text, a local script path, or a `$/` server path
        script: String,

        #[command(flatten)]
        step: StepArgs,
    },

    /// Print the source branch name of a build
    Branch {
        /// Build detail JSON
        #[arg(long, env = "SCRIPTSTEP_BUILD_DETAIL")]
        build_detail: PathBuf,
    },
}

/// Engine, workspace and argument options shared by `run` and `resolve`.
#[derive(Args, Debug, Clone, Default)]
struct StepArgs {
    /// Arguments passed to a script file
    #[arg(short, long, env = "SCRIPTSTEP_ARGS", default_value = "")]
    args: String,

    /// TOML step configuration
    #[arg(short, long, env = "SCRIPTSTEP_CONFIG")]
    config: Option<PathBuf>,

    /// Engine preset (pwsh, sh)
    #[arg(long, env = "SCRIPTSTEP_ENGINE")]
    engine: Option<String>,

    /// Engine working directory
    #[arg(long, env = "SCRIPTSTEP_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Workspace mapping SERVER=LOCAL (repeatable)
    #[arg(long = "workspace-map", value_name = "SERVER=LOCAL")]
    workspace_map: Vec<WorkspaceMapping>,
}

/// Failure policy and execution options for `run`.
#[derive(Args, Debug, Clone, Default)]
struct PolicyArgs {
    /// Never fail the build on script errors
    #[arg(long, env = "SCRIPTSTEP_NO_FAIL_ON_ERROR")]
    no_fail_on_error: bool,

    /// Abort on the first script error
    #[arg(long, env = "SCRIPTSTEP_FAIL_ON_FIRST_ERROR")]
    fail_on_first_error: bool,

    /// Treat warnings as errors
    #[arg(long, env = "SCRIPTSTEP_WARNINGS_AS_ERRORS")]
    warnings_as_errors: bool,

    /// Log errors as warnings and never fail on them
    #[arg(long, env = "SCRIPTSTEP_IGNORE_EXCEPTIONS")]
    ignore_exceptions: bool,

    /// Errors fail the test phase instead of compilation
    #[arg(long, env = "SCRIPTSTEP_TEST_PHASE")]
    test_phase: bool,

    /// When errors are evaluated (streaming, deferred)
    #[arg(long, env = "SCRIPTSTEP_DRAIN")]
    drain: Option<DrainStrategy>,

    /// Abort the script after this many seconds (0 = no limit)
    #[arg(long, env = "SCRIPTSTEP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Importance of script output (low, normal, high)
    #[arg(long, env = "SCRIPTSTEP_MESSAGE_IMPORTANCE")]
    message_importance: Option<Importance>,

    /// Importance of script warnings (low, normal, high)
    #[arg(long, env = "SCRIPTSTEP_WARNING_IMPORTANCE")]
    warning_importance: Option<Importance>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scriptstep_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            script,
            step,
            policy,
            build_detail,
            status_file,
            report_json,
        } => {
            cmd_run(
                &script,
                &step,
                &policy,
                build_detail.as_deref(),
                &status_file,
                report_json,
            )
            .await
        }
        Commands::Resolve { script, step } => cmd_resolve(&script, &step),
        Commands::Branch { build_detail } => cmd_branch(&build_detail),
    }
}

/// Load the config file (if any) and apply command-line overrides.
fn load_config(step: &StepArgs) -> Result<StepConfig> {
    let mut config = match &step.config {
        Some(path) => StepConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StepConfig::default(),
    };

    if let Some(engine) = &step.engine {
        let working_dir = config.engine.working_dir.take();
        config.engine = EngineConfig::preset(engine)?;
        config.engine.working_dir = working_dir;
    }
    if let Some(dir) = &step.working_dir {
        config.engine.working_dir = Some(dir.clone());
    }
    config
        .workspace_mappings
        .extend(step.workspace_map.iter().cloned());

    Ok(config)
}

fn apply_policy(config: &mut StepConfig, policy: &PolicyArgs) {
    if policy.no_fail_on_error {
        config.policy.fail_build_on_error = false;
    }
    config.policy.fail_build_on_first_error |= policy.fail_on_first_error;
    config.policy.treat_warnings_as_errors |= policy.warnings_as_errors;
    config.policy.ignore_exceptions |= policy.ignore_exceptions;
    config.policy.is_test_phase |= policy.test_phase;

    if let Some(drain) = policy.drain {
        config.drain = drain;
    }
    if let Some(secs) = policy.timeout_secs {
        config.timeout_secs = secs;
    }
    if let Some(importance) = policy.message_importance {
        config.message_importance = importance;
    }
    if let Some(importance) = policy.warning_importance {
        config.warning_importance = importance;
    }
}

async fn cmd_run(
    script: &str,
    step_args: &StepArgs,
    policy: &PolicyArgs,
    build_detail: Option<&Path>,
    status_file: &Path,
    report_json: bool,
) -> Result<()> {
    let mut config = load_config(step_args)?;
    apply_policy(&mut config, policy);

    let status = Arc::new(
        JsonFileStatusSink::open(status_file)
            .with_context(|| format!("Failed to open status file {}", status_file.display()))?,
    );
    let mut step = ScriptStep::from_config(config, Arc::new(TracingLogSink), status);
    if let Some(path) = build_detail {
        let detail = BuildDetail::from_json_file(path)
            .with_context(|| format!("Failed to read build detail {}", path.display()))?;
        step = step.with_build_detail(detail);
    }

    info!(engine = %step.config().engine.program, "running script step");
    let report = match step.run(script, &step_args.args).await {
        Ok(report) => report,
        Err(e) => {
            println!("Status: ✗ FAILED");
            return Err(anyhow::Error::new(e).context("Script step failed"));
        }
    };

    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Activation: {}", report.activation_id);
        println!("Status: ✓ SUCCEEDED");
        println!("Source: {}", report.source_kind);
        println!("Duration: {}ms", report.duration_ms);
        println!(
            "Records: {} ({} errors counted)",
            report.records.len(),
            report.error_count
        );
        if let Some(code) = report.exit_code {
            println!("Exit code: {}", code);
        }
    }

    match report.requested_exit_code {
        Some(code) if code != 0 => anyhow::bail!("Script requested exit code {}", code),
        _ => Ok(()),
    }
}

fn cmd_resolve(script: &str, step_args: &StepArgs) -> Result<()> {
    let _span = StepSpan::enter("resolve");
    let config = load_config(step_args)?;
    let workspace = config.workspace();

    let resolver = ScriptResolver::new(config.engine.dialect)
        .with_workspace(workspace.as_ref().map(|ws| ws as &dyn Workspace));
    let command = resolver
        .resolve(script, &step_args.args)
        .context("Failed to resolve script")?;

    println!("Command: {}", command.executable_text());
    println!("Source: {}", command.source().kind());
    println!("Digest: {}", command.digest());
    Ok(())
}

fn cmd_branch(build_detail: &Path) -> Result<()> {
    let _span = StepSpan::enter("branch");
    let detail = BuildDetail::from_json_file(build_detail)
        .with_context(|| format!("Failed to read build detail {}", build_detail.display()))?;
    let branch = derive_branch_name(&detail).context("Failed to derive branch name")?;
    println!("{}", branch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptstep_core::Dialect;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "scriptstep",
            "run",
            "Get-Help Get-Item",
            "--engine",
            "sh",
            "--fail-on-first-error",
            "--drain",
            "deferred",
            "--workspace-map",
            "$/Project=/agent/src",
            "--timeout-secs",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                script,
                step,
                policy,
                ..
            } => {
                assert_eq!(script, "Get-Help Get-Item");
                let mut config = load_config(&step).unwrap();
                apply_policy(&mut config, &policy);

                assert_eq!(config.engine.dialect, Dialect::Posix);
                assert!(config.policy.fail_build_on_error);
                assert!(config.policy.fail_build_on_first_error);
                assert_eq!(config.drain, DrainStrategy::Deferred);
                assert_eq!(config.timeout_secs, 30);
                assert_eq!(config.workspace_mappings.len(), 1);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step.toml");
        std::fs::write(
            &path,
            "timeout_secs = 10\nmessage_importance = \"low\"\n[engine]\nprogram = \"sh\"\nargs = [\"-c\"]\ndialect = \"posix\"\nworking_dir = \"/work\"\n",
        )
        .unwrap();

        let step = StepArgs {
            config: Some(path),
            engine: Some("pwsh".to_string()),
            ..Default::default()
        };
        let policy = PolicyArgs {
            no_fail_on_error: true,
            message_importance: Some(Importance::High),
            ..Default::default()
        };

        let mut config = load_config(&step).unwrap();
        apply_policy(&mut config, &policy);

        assert_eq!(config.engine.program, "pwsh");
        assert_eq!(config.engine.working_dir, Some(PathBuf::from("/work")));
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.message_importance, Importance::High);
        assert!(!config.policy.fail_build_on_error);
    }

    #[test]
    fn test_unknown_engine_preset_is_rejected() {
        let step = StepArgs {
            engine: Some("cmd".to_string()),
            ..Default::default()
        };
        assert!(load_config(&step).is_err());
    }

    #[test]
    fn test_branch_command_reads_build_detail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.json");
        std::fs::write(&path, r#"{"source_get_version": "LG:refs/heads/main:abc"}"#).unwrap();
        assert!(cmd_branch(&path).is_ok());

        std::fs::write(&path, r#"{"source_get_version": "C12"}"#).unwrap();
        assert!(cmd_branch(&path).is_err());
    }
}
