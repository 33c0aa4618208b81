//! Subpools and the views kept of them after each tick.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{KeeperContextPolicy, Presubmit};
use crate::jobs::Job;
use crate::types::{MergeableState, PrNumber, PullRequest, RepoId, Sha, StatusState};

/// What the keeper did with a subpool in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Wait,
    Trigger,
    TriggerBatch,
    Merge,
    MergeBatch,
    MergeFailed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Wait => "WAIT",
            Action::Trigger => "TRIGGER",
            Action::TriggerBatch => "TRIGGER_BATCH",
            Action::Merge => "MERGE",
            Action::MergeBatch => "MERGE_BATCH",
            Action::MergeFailed => "MERGE_FAILED",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The PR facts worth keeping in pool views and history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSummary {
    pub number: PrNumber,
    pub head_sha: Sha,
    pub title: String,
    pub author: String,
}

impl From<&PullRequest> for PrSummary {
    fn from(pr: &PullRequest) -> Self {
        Self {
            number: pr.number,
            head_sha: pr.head_sha.clone(),
            title: pr.title.clone(),
            author: pr.author.clone(),
        }
    }
}

/// The open PRs of one (org, repo, base branch) plus the jobs run for them.
#[derive(Debug, Clone)]
pub struct Subpool {
    pub repo: RepoId,
    pub branch: String,
    /// Base branch head resolved at tick start.
    pub base_sha: Sha,
    pub prs: Vec<PullRequest>,
    pub jobs: Vec<Job>,
    pub policy: KeeperContextPolicy,
    /// Required presubmits per PR, filled after filtering.
    pub presubmits: BTreeMap<PrNumber, Vec<Presubmit>>,
}

impl Subpool {
    /// `org/repo:branch`, the key of this subpool's history.
    pub fn key(&self) -> String {
        pool_key(&self.repo, &self.branch)
    }

    pub fn pr(&self, number: PrNumber) -> Option<&PullRequest> {
        self.prs.iter().find(|p| p.number == number)
    }
}

pub fn pool_key(repo: &RepoId, branch: &str) -> String {
    format!("{repo}:{branch}")
}

/// Groups PRs by (repo, base branch) and hands each group the jobs run
/// against that branch.
pub fn group_subpools(prs: Vec<PullRequest>, jobs: &[Job]) -> BTreeMap<(RepoId, String), (Vec<PullRequest>, Vec<Job>)> {
    let mut groups: BTreeMap<(RepoId, String), (Vec<PullRequest>, Vec<Job>)> = BTreeMap::new();
    for pr in prs {
        groups
            .entry((pr.repo.clone(), pr.base_ref.clone()))
            .or_default()
            .0
            .push(pr);
    }
    for job in jobs {
        let Some(refs) = job.spec.refs.as_ref() else {
            continue;
        };
        if let Some(group) = groups.get_mut(&(refs.repo_id(), refs.base_ref.clone())) {
            group.1.push(job.clone());
        }
    }
    groups
}

/// Required presubmits that must pass before `pr` merges: those that report,
/// are not optional, and would run for the PR's branch and changes.
pub fn required_presubmits(presubmits: &[Presubmit], branch: &str, changes: &[String]) -> Vec<Presubmit> {
    presubmits
        .iter()
        .filter(|p| !p.optional && p.reports())
        .filter(|p| p.should_run(branch, || changes.to_vec(), false, false))
        .cloned()
        .collect()
}

/// Whether any presubmit needs the PR's changed files to decide if it runs.
pub fn needs_changes(presubmits: &[Presubmit], branch: &str) -> bool {
    presubmits
        .iter()
        .any(|p| !p.always_run && p.could_run(branch) && p.changes.can_run_based_on_changes())
}

/// The contexts `pr` needs green: the policy's required contexts plus those
/// of its required presubmits.
pub fn required_contexts(policy: &KeeperContextPolicy, presubmits: &[Presubmit]) -> BTreeSet<String> {
    policy
        .required
        .iter()
        .cloned()
        .chain(presubmits.iter().map(|p| p.context.clone()))
        .collect()
}

/// Contexts blocking `pr`, each with its state (`None` when missing).
pub fn unsuccessful_contexts(
    pr: &PullRequest,
    policy: &KeeperContextPolicy,
    required: &BTreeSet<String>,
) -> Vec<(String, Option<StatusState>)> {
    let mut out: Vec<(String, Option<StatusState>)> = pr
        .contexts
        .iter()
        .filter(|c| c.state != StatusState::Success)
        .filter(|c| required.contains(&c.context) || !policy.is_optional(&c.context))
        .map(|c| (c.context.clone(), Some(c.state)))
        .collect();
    for context in required {
        if pr.context(context).is_none() {
            out.push((context.clone(), None));
        }
    }
    out
}

pub fn is_passing_tests(pr: &PullRequest, policy: &KeeperContextPolicy, required: &BTreeSet<String>) -> bool {
    unsuccessful_contexts(pr, policy, required).is_empty()
}

/// Whether `pr` stays in its subpool: not conflicting, and either passing
/// or blocked only by presubmits that are pending or not yet run.
///
/// A failed context drops the PR until its author pushes or a user
/// retests, so the keeper does not re-trigger the same failure every tick.
pub fn keep_pr(pr: &PullRequest, policy: &KeeperContextPolicy, presubmits: &[Presubmit]) -> bool {
    if pr.mergeable == MergeableState::Conflicting {
        debug!(pr = %pr.number, "dropping conflicting PR");
        return false;
    }
    let required = required_contexts(policy, presubmits);
    let runnable: BTreeSet<&str> = presubmits.iter().map(|p| p.context.as_str()).collect();
    for (context, state) in unsuccessful_contexts(pr, policy, &required) {
        if !matches!(state, None | Some(StatusState::Pending)) {
            debug!(pr = %pr.number, context = %context, "dropping PR with a failed context");
            return false;
        }
        if !runnable.contains(context.as_str()) {
            debug!(pr = %pr.number, context = %context, "dropping PR waiting on an external context");
            return false;
        }
    }
    true
}

/// A subpool as seen at the end of a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub base_sha: Sha,
    pub success_prs: Vec<PrSummary>,
    pub pending_prs: Vec<PrSummary>,
    pub missing_prs: Vec<PrSummary>,
    pub batch_pending: Vec<PrSummary>,
    pub action: Action,
    pub target: Vec<PrSummary>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TEST_CONFIG};
    use crate::types::StatusContext;
    use crate::types::pr::test_pr;

    fn policy() -> KeeperContextPolicy {
        KeeperContextPolicy {
            required: ["ext".to_string()].into(),
            optional: ["lint".to_string()].into(),
            skip_unknown: false,
        }
    }

    fn presubmits() -> Vec<Presubmit> {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        config.presubmits_for(&RepoId::new("org", "repo")).to_vec()
    }

    #[test]
    fn required_presubmits_follow_changes() {
        let all = presubmits();
        let names = |ps: Vec<Presubmit>| ps.into_iter().map(|p| p.name).collect::<Vec<_>>();
        assert_eq!(names(required_presubmits(&all, "master", &[])), vec!["foo", "bar", "baz"]);
        assert_eq!(
            names(required_presubmits(&all, "master", &["docs/a.md".to_string()])),
            vec!["foo", "bar", "baz", "docs"]
        );
        assert!(needs_changes(&all, "master"));
    }

    #[test]
    fn passing_requires_every_required_context() {
        let policy = policy();
        let required = required_contexts(&policy, &[]);
        let mut pr = test_pr(1, "a");
        pr.contexts = vec![
            StatusContext::new("ext", StatusState::Success),
            StatusContext::new("lint", StatusState::Failure),
        ];
        assert!(is_passing_tests(&pr, &policy, &required));
        pr.contexts.push(StatusContext::new("mystery", StatusState::Failure));
        assert!(!is_passing_tests(&pr, &policy, &required));
        pr.contexts.clear();
        assert!(!is_passing_tests(&pr, &policy, &required));
    }

    #[test]
    fn conflicting_prs_are_dropped() {
        let mut pr = test_pr(6, "SHA");
        pr.mergeable = MergeableState::Conflicting;
        assert!(!keep_pr(&pr, &KeeperContextPolicy::default(), &[]));
        pr.mergeable = MergeableState::Unknown;
        assert!(keep_pr(&pr, &KeeperContextPolicy::default(), &[]));
    }

    #[test]
    fn pending_or_missing_presubmits_keep_the_pr() {
        let all = presubmits();
        let required = required_presubmits(&all, "master", &[]);
        let policy = KeeperContextPolicy::default();
        let mut pr = test_pr(1, "a");
        assert!(keep_pr(&pr, &policy, &required));

        pr.contexts = vec![StatusContext::new("foo", StatusState::Pending)];
        assert!(keep_pr(&pr, &policy, &required));

        pr.contexts = vec![StatusContext::new("foo", StatusState::Failure)];
        assert!(!keep_pr(&pr, &policy, &required));
    }

    #[test]
    fn external_contexts_filter_out() {
        let policy = policy();
        let pr = test_pr(1, "a");
        assert!(!keep_pr(&pr, &policy, &[]));
    }

    #[test]
    fn groups_by_repo_and_branch() {
        let mut other = test_pr(2, "b");
        other.base_ref = "release".to_string();
        let groups = group_subpools(vec![test_pr(1, "a"), other, test_pr(3, "c")], &[]);
        assert_eq!(groups.len(), 2);
        let master = &groups[&(RepoId::new("org", "repo"), "master".to_string())];
        assert_eq!(master.0.len(), 2);
    }
}
