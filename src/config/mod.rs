//! Repository, job, keeper and plugin configuration.
//!
//! The whole tree is one YAML document. It is parsed and validated once
//! (every regex compiled, defaults filled) and then treated as immutable;
//! `ConfigAgent` publishes fresh snapshots when the file changes.

pub mod agent;
pub mod branch_protection;
pub mod jobs;
pub mod keeper;
pub mod plugins;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use agent::ConfigAgent;
pub use branch_protection::{Apply, BranchProtection, Policy};
pub use jobs::{Brancher, ChangeMatcher, Pattern, Postsubmit, Presubmit};
pub use keeper::{ContextOptions, KeeperConfig, KeeperContextPolicy, MergeLabels};
pub use plugins::{PluginsConfig, TriggerPolicy, TriggersConfig};

use crate::types::RepoId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid trigger for job {job}: {source}")]
    Regex {
        job: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Substrings of pipeline-run failure messages that indicate infrastructure
/// trouble rather than a test failure.
pub const DEFAULT_TRANSIENT_MESSAGES: &[&str] = &[
    "exceeded quota",
    "failed to create task run pod",
    "Pod was rejected",
    "The node was low on resource",
    "failed to create pod",
    "TaskRunImagePullFailed",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrierConfig {
    pub period_seconds: u64,
    pub transient_messages: Vec<String>,
}

impl Default for RetrierConfig {
    fn default() -> Self {
        Self {
            period_seconds: 60,
            transient_messages: DEFAULT_TRANSIENT_MESSAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetrierConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds.max(1))
    }
}

pub const DEFAULT_REPORT_URL_TEMPLATE: &str =
    "{.BaseURL}/teams/{.Namespace}/projects/{.Owner}/{.Repository}/{.Branch}/{.Build}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Namespace jobs, activities and pipeline runs live in.
    pub namespace: String,
    /// Base of commit status target URLs; no URL is posted when unset.
    pub report_url_base: Option<String>,
    pub report_url_template: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace: "jx".to_string(),
            report_url_base: None,
            report_url_template: DEFAULT_REPORT_URL_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub branch_protection: BranchProtection,
    /// Keyed by `org/repo`.
    pub presubmits: BTreeMap<String, Vec<Presubmit>>,
    /// Keyed by `org/repo`.
    pub postsubmits: BTreeMap<String, Vec<Postsubmit>>,
    pub keeper: KeeperConfig,
    pub plugins: PluginsConfig,
    pub triggers: TriggersConfig,
    pub retrier: RetrierConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.finalize()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Fills defaults and rejects configs the controllers cannot act on.
    fn finalize(&mut self) -> Result<(), ConfigError> {
        for (repo, presubmits) in &mut self.presubmits {
            if RepoId::parse(repo).is_none() {
                return Err(ConfigError::Invalid(format!("presubmit key {repo:?} is not org/repo")));
            }
            let mut names = HashSet::new();
            let mut contexts = HashSet::new();
            for p in presubmits.iter_mut() {
                if p.name.is_empty() {
                    return Err(ConfigError::Invalid(format!("unnamed presubmit in {repo}")));
                }
                p.set_defaults().map_err(|source| ConfigError::Regex {
                    job: p.name.clone(),
                    source,
                })?;
                if !names.insert(p.name.clone()) {
                    return Err(ConfigError::Invalid(format!("duplicate presubmit {} in {repo}", p.name)));
                }
                if !contexts.insert(p.context.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "presubmits in {repo} share context {}",
                        p.context
                    )));
                }
            }
        }
        for (repo, postsubmits) in &mut self.postsubmits {
            if RepoId::parse(repo).is_none() {
                return Err(ConfigError::Invalid(format!("postsubmit key {repo:?} is not org/repo")));
            }
            for p in postsubmits.iter_mut() {
                if p.name.is_empty() {
                    return Err(ConfigError::Invalid(format!("unnamed postsubmit in {repo}")));
                }
                p.set_defaults();
            }
        }
        if self.keeper.max_goroutines == 0 {
            return Err(ConfigError::Invalid("keeper.max_goroutines must be positive".to_string()));
        }
        Ok(())
    }

    pub fn presubmits_for(&self, repo: &RepoId) -> &[Presubmit] {
        self.presubmits
            .get(&repo.full_name())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn postsubmits_for(&self, repo: &RepoId) -> &[Postsubmit] {
        self.postsubmits
            .get(&repo.full_name())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn trigger_for(&self, repo: &RepoId) -> TriggerPolicy {
        self.triggers.for_repo(repo)
    }

    pub fn policy_for(&self, repo: &RepoId, branch: &str) -> Policy {
        self.branch_protection.policy_for(&repo.owner, &repo.repo, branch)
    }

    /// The contexts gating merges into `repo@branch`, not counting the
    /// presubmits each PR must run.
    pub fn keeper_context_policy(&self, repo: &RepoId, branch: &str) -> KeeperContextPolicy {
        let options = self.keeper.context_options_for(repo);
        let mut required: BTreeSet<String> = options.required_contexts.iter().cloned().collect();
        if options.from_branch_protection.unwrap_or(true) {
            required.extend(self.policy_for(repo, branch).required_contexts());
        }
        let mut optional: BTreeSet<String> = options.optional_contexts.iter().cloned().collect();
        for p in self.presubmits_for(repo) {
            if p.optional || !p.reports() {
                optional.insert(p.context.clone());
            }
        }
        // Presubmit contexts are known, so they are never "unknown" even when
        // a PR does not need them.
        for p in self.presubmits_for(repo) {
            if !p.optional && p.reports() && !p.could_run(branch) {
                optional.insert(p.context.clone());
            }
        }
        optional.retain(|c| !required.contains(c));
        KeeperContextPolicy {
            required,
            optional,
            skip_unknown: options.skip_unknown_contexts.unwrap_or(false),
        }
    }
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"
branch_protection:
  protect: true
  required_status_checks:
    contexts: [ci/protected]
presubmits:
  org/repo:
    - name: foo
      always_run: true
    - name: bar
      always_run: true
    - name: baz
      always_run: true
    - name: docs
      run_if_changed: '^docs/'
    - name: flaky
      always_run: true
      optional: true
postsubmits:
  org/repo:
    - name: deploy
      branches: [master]
keeper:
  queries:
    - repos: [org/repo]
      labels: [approved]
  batch_size_limit:
    '*': 5
plugins:
  org: [trigger, lgtm, override]
triggers:
  - repos: [org]
    join_org_url: https://example.com/join
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_fills_defaults() {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        let repo = RepoId::new("org", "repo");
        let presubmits = config.presubmits_for(&repo);
        assert_eq!(presubmits.len(), 5);
        assert_eq!(presubmits[0].context, "foo");
        assert_eq!(presubmits[0].rerun_command, "/test foo");
        assert_eq!(config.postsubmits_for(&repo)[0].context, "deploy");
        assert!(config.presubmits_for(&RepoId::new("org", "none")).is_empty());
        assert_eq!(config.pipeline.namespace, "jx");
        assert_eq!(config.retrier.period(), Duration::from_secs(60));
        assert_eq!(config.trigger_for(&repo).join_org_url, "https://example.com/join");
    }

    #[test]
    fn context_policy_combines_protection_and_presubmits() {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        let policy = config.keeper_context_policy(&RepoId::new("org", "repo"), "master");
        assert!(policy.required.contains("ci/protected"));
        assert!(policy.is_optional("flaky"));
        assert!(!policy.is_optional("unknown-thing"));
    }

    #[test]
    fn duplicate_contexts_rejected() {
        let err = Config::from_yaml(
            "presubmits:\n  org/repo:\n    - name: a\n      context: ci\n    - name: b\n      context: ci\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("share context")));
    }

    #[test]
    fn bad_repo_key_rejected() {
        let err = Config::from_yaml("presubmits:\n  justorg:\n    - name: a\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_document_is_default() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
