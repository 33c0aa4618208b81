//! Merge-pool controller settings.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::branch_protection::Apply;
use crate::scm::SearchQuery;
use crate::types::{MergeMethod, PullRequest, RepoId};

/// Which contexts gate merging, beyond the per-PR presubmits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub from_branch_protection: Option<bool>,
    pub required_contexts: Vec<String>,
    pub optional_contexts: Vec<String>,
    pub skip_unknown_contexts: Option<bool>,
}

impl Apply for ContextOptions {
    fn apply(&self, child: &Self) -> Self {
        let union = |a: &[String], b: &[String]| -> Vec<String> {
            a.iter().chain(b).cloned().collect::<BTreeSet<_>>().into_iter().collect()
        };
        ContextOptions {
            from_branch_protection: child.from_branch_protection.or(self.from_branch_protection),
            required_contexts: union(&self.required_contexts, &child.required_contexts),
            optional_contexts: union(&self.optional_contexts, &child.optional_contexts),
            skip_unknown_contexts: child.skip_unknown_contexts.or(self.skip_unknown_contexts),
        }
    }
}

/// The resolved context policy for one subpool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeeperContextPolicy {
    pub required: BTreeSet<String>,
    pub optional: BTreeSet<String>,
    pub skip_unknown: bool,
}

impl KeeperContextPolicy {
    /// Optional contexts never block a merge. Unknown contexts are optional
    /// only when `skip_unknown` is set.
    pub fn is_optional(&self, context: &str) -> bool {
        if self.required.contains(context) {
            return false;
        }
        self.optional.contains(context) || self.skip_unknown
    }
}

/// Labels that pick a merge method for one PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeLabels {
    pub squash: String,
    pub rebase: String,
    pub merge: String,
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self {
            squash: "squash".to_string(),
            rebase: "rebase".to_string(),
            merge: "merge".to_string(),
        }
    }
}

impl MergeLabels {
    /// The method labels present on `pr`.
    pub fn methods_on(&self, pr: &PullRequest) -> Vec<MergeMethod> {
        [
            (MergeMethod::Squash, &self.squash),
            (MergeMethod::Rebase, &self.rebase),
            (MergeMethod::Merge, &self.merge),
        ]
        .into_iter()
        .filter(|(_, label)| !label.is_empty() && pr.has_label(label))
        .map(|(method, _)| method)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub queries: Vec<SearchQuery>,
    pub sync_period_seconds: u64,
    /// Subpools processed concurrently per tick.
    pub max_goroutines: usize,
    /// Per `*`, `org` or `org/repo`. Negative disables batching, zero means
    /// no limit.
    pub batch_size_limit: BTreeMap<String, i64>,
    pub merge_method: BTreeMap<String, MergeMethod>,
    pub default_merge_method: MergeMethod,
    pub merge_labels: MergeLabels,
    pub context_options: ContextOptions,
    /// Per `org` or `org/repo`, applied over `context_options`.
    pub repo_context_options: BTreeMap<String, ContextOptions>,
    pub history_capacity: usize,
    pub history_uri: Option<String>,
    pub target_url: String,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            sync_period_seconds: 30,
            max_goroutines: 20,
            batch_size_limit: BTreeMap::new(),
            merge_method: BTreeMap::new(),
            default_merge_method: MergeMethod::Merge,
            merge_labels: MergeLabels::default(),
            context_options: ContextOptions::default(),
            repo_context_options: BTreeMap::new(),
            history_capacity: 100,
            history_uri: None,
            target_url: String::new(),
        }
    }
}

impl KeeperConfig {
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_seconds.max(1))
    }

    fn lookup<'a, T>(map: &'a BTreeMap<String, T>, repo: &RepoId) -> Option<&'a T> {
        map.get(&repo.full_name()).or_else(|| map.get(&repo.owner))
    }

    pub fn merge_method_for(&self, repo: &RepoId) -> MergeMethod {
        Self::lookup(&self.merge_method, repo)
            .copied()
            .unwrap_or(self.default_merge_method)
    }

    /// Largest batch allowed for `repo`, or `None` when batching is disabled.
    pub fn batch_limit(&self, repo: &RepoId) -> Option<usize> {
        let limit = Self::lookup(&self.batch_size_limit, repo)
            .or_else(|| self.batch_size_limit.get("*"))
            .copied()
            .unwrap_or(0);
        match limit {
            l if l < 0 => None,
            0 => Some(usize::MAX),
            l => Some(l as usize),
        }
    }

    pub fn context_options_for(&self, repo: &RepoId) -> ContextOptions {
        let mut options = self.context_options.apply(&ContextOptions::default());
        if let Some(org) = self.repo_context_options.get(&repo.owner) {
            options = options.apply(org);
        }
        if let Some(r) = self.repo_context_options.get(&repo.full_name()) {
            options = options.apply(r);
        }
        options
    }
}
