//! CI context injection.
//!
//! Build metadata is read from a [`BuildDetail`], the source branch is
//! derived from the source version (or the definition's Git provider), and
//! the result is rendered as an [`EnvMap`] handed to the engine session.
//! Nothing is written to the process environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepError};

/// Environment passed to an engine session, in stable key order.
pub type EnvMap = BTreeMap<String, String>;

pub const ENV_TF_BUILD: &str = "TF_BUILD";
pub const ENV_BUILD_DEFINITION_NAME: &str = "TF_BUILD_BUILDDEFINITIONNAME";
pub const ENV_BUILD_NUMBER: &str = "TF_BUILD_BUILDNUMBER";
pub const ENV_BUILD_REASON: &str = "TF_BUILD_BUILDREASON";
pub const ENV_BUILD_URI: &str = "TF_BUILD_BUILDURI";
pub const ENV_DROP_LOCATION: &str = "TF_BUILD_DROPLOCATION";
pub const ENV_SOURCE_GET_VERSION: &str = "TF_BUILD_SOURCEGETVERSION";
pub const ENV_SOURCE_BRANCH_NAME: &str = "TF_BUILD_SOURCEBRANCHNAME";
pub const ENV_TEAM_PROJECT: &str = "TF_BUILD_TEAMPROJECT";

/// Source provider names that identify Git.
const GIT_PROVIDER_NAMES: [&str; 2] = ["TFGIT", "GIT"];

/// Provider field holding the default branch.
pub const DEFAULT_BRANCH_FIELD: &str = "DefaultBranch";

/// Prefix of Git source versions: `LG:<ref>:<commit>`.
const GIT_VERSION_PREFIX: &str = "LG:";

/// Source provider configured on the build definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceProvider {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl SourceProvider {
    pub fn is_git(&self) -> bool {
        GIT_PROVIDER_NAMES
            .iter()
            .any(|name| self.name.eq_ignore_ascii_case(name))
    }
}

/// Metadata of the build running the step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildDetail {
    pub build_definition_name: String,
    pub build_number: String,
    pub build_reason: String,
    pub build_uri: String,
    pub drop_location: String,
    pub source_get_version: String,
    pub team_project: String,
    pub default_source_provider: Option<SourceProvider>,
}

impl BuildDetail {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Split a Git source version `LG:<ref>:<commit>` into `(ref, commit)`.
pub fn parse_git_source_version(version: &str) -> Option<(String, String)> {
    let prefix = version.get(..GIT_VERSION_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(GIT_VERSION_PREFIX) {
        return None;
    }
    let (branch, commit) = version[GIT_VERSION_PREFIX.len()..].rsplit_once(':')?;
    if branch.is_empty() || commit.is_empty() {
        return None;
    }
    Some((branch.to_string(), commit.to_string()))
}

/// Branch the build runs on, reduced to its last path segment.
///
/// Falls back to the definition's default branch when the source version
/// is not a Git version and the default provider is Git.
pub fn derive_branch_name(detail: &BuildDetail) -> Result<String> {
    let branch = match parse_git_source_version(&detail.source_get_version) {
        Some((branch, _commit)) => Some(branch),
        None => detail
            .default_source_provider
            .as_ref()
            .filter(|provider| provider.is_git())
            .and_then(|provider| provider.fields.get(DEFAULT_BRANCH_FIELD).cloned()),
    };

    let branch = branch
        .filter(|b| !b.is_empty())
        .ok_or(StepError::BranchNotFound)?;

    Ok(match branch.rsplit_once('/') {
        Some((_, tail)) => tail.to_string(),
        None => branch,
    })
}

/// CI variables exposed to the script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CiContext {
    pub build_definition_name: String,
    pub build_number: String,
    pub build_reason: String,
    pub build_uri: String,
    pub drop_location: String,
    pub source_version: String,
    pub branch_name: String,
    pub team_project: String,
}

impl CiContext {
    pub fn to_env(&self) -> EnvMap {
        [
            (ENV_TF_BUILD, "True"),
            (ENV_BUILD_DEFINITION_NAME, self.build_definition_name.as_str()),
            (ENV_BUILD_NUMBER, self.build_number.as_str()),
            (ENV_BUILD_REASON, self.build_reason.as_str()),
            (ENV_BUILD_URI, self.build_uri.as_str()),
            (ENV_DROP_LOCATION, self.drop_location.as_str()),
            (ENV_SOURCE_GET_VERSION, self.source_version.as_str()),
            (ENV_SOURCE_BRANCH_NAME, self.branch_name.as_str()),
            (ENV_TEAM_PROJECT, self.team_project.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

/// Derive the CI context for one activation.
pub fn compute_context(detail: &BuildDetail) -> Result<CiContext> {
    Ok(CiContext {
        build_definition_name: detail.build_definition_name.clone(),
        build_number: detail.build_number.clone(),
        build_reason: detail.build_reason.clone(),
        build_uri: detail.build_uri.clone(),
        drop_location: detail.drop_location.clone(),
        source_version: detail.source_get_version.clone(),
        branch_name: derive_branch_name(detail)?,
        team_project: detail.team_project.clone(),
    })
}
