//! Open pull request search queries.
//!
//! The keeper is configured with a list of queries, each selecting PRs by
//! org/repo, required labels, forbidden labels and base branches. A query
//! renders to the host's issue-search syntax; the in-memory client evaluates
//! it directly against its PRs.

use serde::{Deserialize, Serialize};

use crate::types::PullRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub orgs: Vec<String>,
    /// `owner/repo` names.
    pub repos: Vec<String>,
    pub excluded_repos: Vec<String>,
    pub labels: Vec<String>,
    pub missing_labels: Vec<String>,
    pub included_branches: Vec<String>,
    pub excluded_branches: Vec<String>,
    pub milestone: Option<String>,
    pub review_approved_required: bool,
}

impl SearchQuery {
    /// Renders the query in GitHub issue-search syntax.
    pub fn render(&self) -> String {
        let mut parts = vec![
            "is:pr".to_string(),
            "state:open".to_string(),
            "archived:false".to_string(),
        ];
        parts.extend(self.orgs.iter().map(|o| format!("org:\"{o}\"")));
        parts.extend(self.repos.iter().map(|r| format!("repo:\"{r}\"")));
        parts.extend(self.excluded_repos.iter().map(|r| format!("-repo:\"{r}\"")));
        parts.extend(self.labels.iter().map(|l| format!("label:\"{l}\"")));
        parts.extend(self.missing_labels.iter().map(|l| format!("-label:\"{l}\"")));
        parts.extend(self.included_branches.iter().map(|b| format!("base:\"{b}\"")));
        parts.extend(self.excluded_branches.iter().map(|b| format!("-base:\"{b}\"")));
        if let Some(m) = &self.milestone {
            parts.push(format!("milestone:\"{m}\""));
        }
        if self.review_approved_required {
            parts.push("review:approved".to_string());
        }
        parts.join(" ")
    }

    /// True if the query names `owner` through an org or repo term.
    pub fn involves_owner(&self, owner: &str) -> bool {
        self.orgs.iter().any(|o| o.eq_ignore_ascii_case(owner))
            || self
                .repos
                .iter()
                .any(|r| r.split('/').next().is_some_and(|o| o.eq_ignore_ascii_case(owner)))
    }

    /// A copy restricted to `owner`'s orgs and repos, or `None` if nothing is
    /// left.
    pub fn for_owner(&self, owner: &str) -> Option<SearchQuery> {
        let mut scoped = self.clone();
        scoped.orgs.retain(|o| o.eq_ignore_ascii_case(owner));
        scoped
            .repos
            .retain(|r| r.split('/').next().is_some_and(|o| o.eq_ignore_ascii_case(owner)));
        if scoped.orgs.is_empty() && scoped.repos.is_empty() {
            None
        } else {
            Some(scoped)
        }
    }

    /// Client-side evaluation. Milestone and review terms are not visible on
    /// a `PullRequest` and are ignored.
    pub fn matches(&self, pr: &PullRequest) -> bool {
        let full = pr.repo.full_name();
        let in_scope = self.orgs.iter().any(|o| o.eq_ignore_ascii_case(&pr.repo.owner))
            || self.repos.iter().any(|r| r.eq_ignore_ascii_case(&full));
        if !in_scope || self.excluded_repos.iter().any(|r| r.eq_ignore_ascii_case(&full)) {
            return false;
        }
        if !self.labels.iter().all(|l| pr.has_label(l)) {
            return false;
        }
        if self.missing_labels.iter().any(|l| pr.has_label(l)) {
            return false;
        }
        if !self.included_branches.is_empty() && !self.included_branches.contains(&pr.base_ref) {
            return false;
        }
        !self.excluded_branches.contains(&pr.base_ref)
    }
}
