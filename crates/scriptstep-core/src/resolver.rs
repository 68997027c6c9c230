//! Script reference resolution.
//!
//! A script reference is one of:
//! - a version-control server path (`$/Project/build/deploy.ps1`), mapped to
//!   a local working-copy file through the build [`Workspace`];
//! - a local file path;
//! - inline script text, passed to the engine unchanged.
//!
//! `%NAME%` environment references are expanded before classification.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::Dialect;
use crate::error::{Result, StepError};

/// Prefix of version-control server paths.
pub const SERVER_ROOT: &str = "$/";

/// Whether `reference` uses server path syntax.
pub fn is_server_path(reference: &str) -> bool {
    reference.starts_with(SERVER_ROOT)
}

/// The build workspace: maps server items to local files.
pub trait Workspace: Send + Sync {
    fn is_server_item(&self, reference: &str) -> bool {
        is_server_path(reference)
    }

    /// Local working-copy path for a server path, if it is mapped.
    fn local_path(&self, server_path: &str) -> Option<PathBuf>;

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Workspace defined by `server folder → local folder` mappings.
///
/// The longest matching server folder wins. Server paths compare
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MappedWorkspace {
    mappings: Vec<(String, PathBuf)>,
}

impl MappedWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, server_path: &str, local_path: impl Into<PathBuf>) -> &mut Self {
        let server = server_path.trim_end_matches('/').to_string();
        self.mappings.push((server, local_path.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl Workspace for MappedWorkspace {
    fn local_path(&self, server_path: &str) -> Option<PathBuf> {
        let wanted = server_path.to_ascii_lowercase();
        self.mappings
            .iter()
            .filter(|(server, _)| {
                let server = server.to_ascii_lowercase();
                wanted == server || wanted.starts_with(&format!("{server}/"))
            })
            .max_by_key(|(server, _)| server.len())
            .map(|(server, local)| {
                server_path[server.len()..]
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .fold(local.clone(), |path, segment| path.join(segment))
            })
    }
}

/// Where a resolved command came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptSource {
    Inline,
    LocalFile {
        path: PathBuf,
    },
    VersionControlFile {
        server_path: String,
        local_path: PathBuf,
    },
}

impl ScriptSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptSource::Inline => "inline",
            ScriptSource::LocalFile { .. } => "local_file",
            ScriptSource::VersionControlFile { .. } => "version_control_file",
        }
    }
}

/// The single command line handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedCommand {
    executable_text: String,
    source: ScriptSource,
}

impl ResolvedCommand {
    pub fn new(executable_text: String, source: ScriptSource) -> Self {
        Self {
            executable_text,
            source,
        }
    }

    pub fn executable_text(&self) -> &str {
        &self.executable_text
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// SHA-256 of the executable text, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.executable_text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%([^%]+)%").expect("static pattern is valid"))
}

/// Expand `%NAME%` references using `lookup`. Unknown names are kept as is.
pub fn expand_env_vars<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env_reference()
        .replace_all(text, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Resolves raw script references into engine commands.
pub struct ScriptResolver<'a> {
    workspace: Option<&'a dyn Workspace>,
    dialect: Dialect,
}

impl<'a> ScriptResolver<'a> {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            workspace: None,
            dialect,
        }
    }

    pub fn with_workspace(mut self, workspace: Option<&'a dyn Workspace>) -> Self {
        self.workspace = workspace;
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(&self, raw_script: &str, arguments: &str) -> Result<ResolvedCommand> {
        self.resolve_with_env(raw_script, arguments, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve_with_env<F>(
        &self,
        raw_script: &str,
        arguments: &str,
        lookup: F,
    ) -> Result<ResolvedCommand>
    where
        F: Fn(&str) -> Option<String>,
    {
        if raw_script.trim().is_empty() {
            return Err(StepError::EmptyScript);
        }

        let script = expand_env_vars(raw_script, lookup);
        if script.trim().is_empty() {
            return Err(StepError::EmptyScript);
        }

        if self.is_server_item(&script) {
            let local_path = self
                .workspace
                .and_then(|ws| ws.local_path(&script))
                .ok_or_else(|| StepError::ScriptNotFound {
                    server_path: script.clone(),
                    local_path: None,
                })?;
            if !self.file_exists(&local_path) {
                return Err(StepError::ScriptNotFound {
                    server_path: script,
                    local_path: Some(local_path.display().to_string()),
                });
            }
            let text = self
                .dialect
                .invoke_file(&local_path.to_string_lossy(), arguments);
            return Ok(ResolvedCommand::new(
                text,
                ScriptSource::VersionControlFile {
                    server_path: script,
                    local_path,
                },
            ));
        }

        let path = PathBuf::from(&script);
        if self.file_exists(&path) {
            let text = self.dialect.invoke_file(&script, arguments);
            return Ok(ResolvedCommand::new(text, ScriptSource::LocalFile { path }));
        }

        Ok(ResolvedCommand::new(script, ScriptSource::Inline))
    }

    fn is_server_item(&self, reference: &str) -> bool {
        match self.workspace {
            Some(ws) => ws.is_server_item(reference),
            None => is_server_path(reference),
        }
    }

    fn file_exists(&self, path: &Path) -> bool {
        match self.workspace {
            Some(ws) => ws.exists(path),
            None => path.is_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_empty_and_whitespace_scripts_fail() {
        let resolver = ScriptResolver::new(Dialect::PowerShell);
        for raw in ["", "   ", "\t\n"] {
            let err = resolver.resolve_with_env(raw, "", no_env).unwrap_err();
            assert!(matches!(err, StepError::EmptyScript), "{raw:?}");
        }
    }

    #[test]
    fn test_script_blank_after_expansion_fails() {
        let resolver = ScriptResolver::new(Dialect::PowerShell);
        let err = resolver
            .resolve_with_env("%BLANK%", "", |name| {
                (name == "BLANK").then(|| "   ".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, StepError::EmptyScript));
    }

    #[test]
    fn test_inline_script_is_unchanged() {
        let resolver = ScriptResolver::new(Dialect::PowerShell);
        let cmd = resolver
            .resolve_with_env("Get-Help Get-Item", "-ignored", no_env)
            .unwrap();
        assert_eq!(cmd.executable_text(), "Get-Help Get-Item");
        assert_eq!(cmd.source(), &ScriptSource::Inline);
    }

    #[test]
    fn test_inline_script_env_expanded() {
        let env: HashMap<&str, &str> = [("TARGET", "Release")].into_iter().collect();
        let resolver = ScriptResolver::new(Dialect::PowerShell);
        let cmd = resolver
            .resolve_with_env("Write-Host %TARGET% %MISSING%", "", |name| {
                env.get(name).map(|v| v.to_string())
            })
            .unwrap();
        assert_eq!(cmd.executable_text(), "Write-Host Release %MISSING%");
    }

    #[test]
    fn test_local_file_is_invoked_with_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.ps1");
        std::fs::write(&script, "Write-Output hi").unwrap();
        let script_str = script.to_string_lossy().to_string();

        let resolver = ScriptResolver::new(Dialect::PowerShell);
        let cmd = resolver
            .resolve_with_env(&script_str, "-Configuration Release", no_env)
            .unwrap();
        assert_eq!(
            cmd.executable_text(),
            format!("& '{script_str}' -Configuration Release")
        );
        assert_eq!(cmd.source(), &ScriptSource::LocalFile { path: script });
    }

    #[test]
    fn test_local_file_path_from_env_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.sh"), "echo hi").unwrap();
        let root = dir.path().to_string_lossy().to_string();

        let resolver = ScriptResolver::new(Dialect::Posix);
        let cmd = resolver
            .resolve_with_env("%SCRIPT_ROOT%/run.sh", "a b", |name| {
                (name == "SCRIPT_ROOT").then(|| root.clone())
            })
            .unwrap();
        assert_eq!(cmd.source().kind(), "local_file");
        assert!(cmd.executable_text().ends_with("run.sh' a b"));
    }

    #[test]
    fn test_server_path_without_workspace_is_not_found() {
        let resolver = ScriptResolver::new(Dialect::PowerShell);
        let err = resolver
            .resolve_with_env("$/Test Path/Not A Real Path", "", no_env)
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::ScriptNotFound { local_path: None, .. }
        ));
    }

    #[test]
    fn test_server_path_missing_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = MappedWorkspace::new();
        ws.map("$/Project", dir.path());

        let resolver = ScriptResolver::new(Dialect::PowerShell).with_workspace(Some(&ws));
        let err = resolver
            .resolve_with_env("$/Project/build/missing.ps1", "", no_env)
            .unwrap_err();
        match err {
            StepError::ScriptNotFound {
                server_path,
                local_path,
            } => {
                assert_eq!(server_path, "$/Project/build/missing.ps1");
                assert!(local_path.unwrap().ends_with("missing.ps1"));
            }
            other => panic!("expected ScriptNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_server_path_resolves_through_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        let local = dir.path().join("build").join("deploy.ps1");
        std::fs::write(&local, "Write-Output deploy").unwrap();

        let mut ws = MappedWorkspace::new();
        ws.map("$/Project", dir.path());

        let resolver = ScriptResolver::new(Dialect::PowerShell).with_workspace(Some(&ws));
        let cmd = resolver
            .resolve_with_env("$/Project/build/deploy.ps1", "-WhatIf", no_env)
            .unwrap();

        assert_eq!(
            cmd.executable_text(),
            format!("& '{}' -WhatIf", local.display())
        );
        assert_eq!(
            cmd.source(),
            &ScriptSource::VersionControlFile {
                server_path: "$/Project/build/deploy.ps1".to_string(),
                local_path: local,
            }
        );
    }

    #[test]
    fn test_mapped_workspace_longest_prefix_wins() {
        let mut ws = MappedWorkspace::new();
        ws.map("$/Project", "/src")
            .map("$/Project/Tools/", "/tools");

        assert_eq!(
            ws.local_path("$/project/tools/run.ps1"),
            Some(PathBuf::from("/tools/run.ps1"))
        );
        assert_eq!(
            ws.local_path("$/Project/Main/build.ps1"),
            Some(PathBuf::from("/src/Main/build.ps1"))
        );
        assert_eq!(ws.local_path("$/Project"), Some(PathBuf::from("/src")));
        assert_eq!(ws.local_path("$/ProjectX/a.ps1"), None);
        assert_eq!(ws.len(), 2);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = ResolvedCommand::new("echo hi".to_string(), ScriptSource::Inline);
        let b = ResolvedCommand::new("echo hi".to_string(), ScriptSource::Inline);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
