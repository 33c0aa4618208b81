//! Branch-protection policy and its org → repo → branch inheritance.
//!
//! A policy is a tree of optional settings. Resolving the policy for a branch
//! starts at the global level and applies each more specific layer on top:
//!
//! | Field kind        | Merge rule                                   |
//! |-------------------|----------------------------------------------|
//! | `Option<bool>` etc| child value wins if set, else parent         |
//! | `Vec<String>`     | union; result is sorted and de-duplicated    |
//! | nested policy     | recursive merge; both unset → unset          |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Layered merge of a parent setting with a more specific child.
pub trait Apply {
    fn apply(&self, child: &Self) -> Self;
}

fn pick<T: Clone>(parent: &Option<T>, child: &Option<T>) -> Option<T> {
    child.clone().or_else(|| parent.clone())
}

fn union(parent: &[String], child: &[String]) -> Vec<String> {
    parent
        .iter()
        .chain(child)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn merge_nested<T: Apply + Default>(parent: &Option<T>, child: &Option<T>) -> Option<T> {
    match (parent, child) {
        (Some(p), Some(c)) => Some(p.apply(c)),
        (None, Some(c)) => Some(T::default().apply(c)),
        (Some(p), None) => Some(p.apply(&T::default())),
        (None, None) => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPolicy {
    /// Contexts that must be green before merging.
    pub contexts: Vec<String>,
    /// Require the branch to be up to date with its base.
    pub strict: Option<bool>,
}

impl Apply for ContextPolicy {
    fn apply(&self, child: &Self) -> Self {
        ContextPolicy {
            contexts: union(&self.contexts, &child.contexts),
            strict: pick(&self.strict, &child.strict),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    pub dismiss_stale_reviews: Option<bool>,
    pub require_code_owner_reviews: Option<bool>,
    pub required_approving_review_count: Option<u32>,
}

impl Apply for ReviewPolicy {
    fn apply(&self, child: &Self) -> Self {
        ReviewPolicy {
            dismiss_stale_reviews: pick(&self.dismiss_stale_reviews, &child.dismiss_stale_reviews),
            require_code_owner_reviews: pick(
                &self.require_code_owner_reviews,
                &child.require_code_owner_reviews,
            ),
            required_approving_review_count: pick(
                &self.required_approving_review_count,
                &child.required_approving_review_count,
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrictions {
    pub users: Vec<String>,
    pub teams: Vec<String>,
}

impl Apply for Restrictions {
    fn apply(&self, child: &Self) -> Self {
        Restrictions {
            users: union(&self.users, &child.users),
            teams: union(&self.teams, &child.teams),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub protect: Option<bool>,
    pub required_status_checks: Option<ContextPolicy>,
    pub enforce_admins: Option<bool>,
    pub required_pull_request_reviews: Option<ReviewPolicy>,
    pub restrictions: Option<Restrictions>,
    pub required_linear_history: Option<bool>,
    pub allow_force_pushes: Option<bool>,
    pub allow_deletions: Option<bool>,
}

impl Apply for Policy {
    fn apply(&self, child: &Self) -> Self {
        Policy {
            protect: pick(&self.protect, &child.protect),
            required_status_checks: merge_nested(
                &self.required_status_checks,
                &child.required_status_checks,
            ),
            enforce_admins: pick(&self.enforce_admins, &child.enforce_admins),
            required_pull_request_reviews: merge_nested(
                &self.required_pull_request_reviews,
                &child.required_pull_request_reviews,
            ),
            restrictions: merge_nested(&self.restrictions, &child.restrictions),
            required_linear_history: pick(
                &self.required_linear_history,
                &child.required_linear_history,
            ),
            allow_force_pushes: pick(&self.allow_force_pushes, &child.allow_force_pushes),
            allow_deletions: pick(&self.allow_deletions, &child.allow_deletions),
        }
    }
}

impl Policy {
    pub fn is_protected(&self) -> bool {
        self.protect.unwrap_or(false)
    }

    /// Contexts required by this policy. Empty when the branch is unprotected.
    pub fn required_contexts(&self) -> Vec<String> {
        if !self.is_protected() {
            return Vec::new();
        }
        self.required_status_checks
            .as_ref()
            .map(|c| c.contexts.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoProtection {
    #[serde(flatten)]
    pub policy: Policy,
    pub branches: BTreeMap<String, Policy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgProtection {
    #[serde(flatten)]
    pub policy: Policy,
    pub repos: BTreeMap<String, RepoProtection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchProtection {
    #[serde(flatten)]
    pub policy: Policy,
    pub orgs: BTreeMap<String, OrgProtection>,
}

impl BranchProtection {
    /// The effective policy for `org/repo@branch`.
    pub fn policy_for(&self, org: &str, repo: &str, branch: &str) -> Policy {
        let mut policy = self.policy.clone();
        let Some(o) = self.orgs.get(org) else {
            return policy;
        };
        policy = policy.apply(&o.policy);
        let Some(r) = o.repos.get(repo) else {
            return policy;
        };
        policy = policy.apply(&r.policy);
        if let Some(b) = r.branches.get(branch) {
            policy = policy.apply(b);
        }
        policy
    }
}
