//! Pull request views as read from the source host.
//!
//! A `PullRequest` is a read-only snapshot: the keeper and the trigger never
//! mutate one, they re-read it from the host on the next event or tick.

use serde::{Deserialize, Serialize};

use super::ids::{PrNumber, RepoId, Sha};

/// Whether the host can merge a pull request cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeableState {
    Mergeable,
    Conflicting,
    /// The host has not computed mergeability yet.
    #[default]
    Unknown,
}

/// State of one commit status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }

    /// Parses a host state string. Unrecognised values read as `Error`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "expected" | "queued" | "in_progress" | "running" => StatusState::Pending,
            "success" => StatusState::Success,
            "failure" | "failed" => StatusState::Failure,
            _ => StatusState::Error,
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit status attached to a SHA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContext {
    pub context: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_url: String,
}

impl StatusContext {
    pub fn new(context: impl Into<String>, state: StatusState) -> Self {
        StatusContext {
            context: context.into(),
            state,
            description: String::new(),
            target_url: String::new(),
        }
    }
}

/// A status write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInput {
    pub state: StatusState,
    pub label: String,
    pub description: String,
    pub target_url: String,
}

/// Snapshot of an open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo: RepoId,
    pub number: PrNumber,
    pub head_sha: Sha,
    pub head_ref: String,
    pub base_ref: String,
    pub base_sha: Sha,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub author: String,
    #[serde(default)]
    pub mergeable: MergeableState,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Status contexts on `head_sha`.
    #[serde(default)]
    pub contexts: Vec<StatusContext>,
    #[serde(default)]
    pub link: String,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    pub fn context(&self, name: &str) -> Option<&StatusContext> {
        self.contexts.iter().find(|c| c.context == name)
    }
}

/// A comment on an issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: super::ids::CommentId,
    pub author: String,
    pub body: String,
}

/// Merge methods accepted by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub const ALL: [MergeMethod; 3] = [MergeMethod::Merge, MergeMethod::Squash, MergeMethod::Rebase];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a merge call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    /// The head SHA the PR must still be at.
    pub sha: Sha,
    pub method: MergeMethod,
    pub title: String,
    pub body: String,
}

#[cfg(test)]
pub(crate) fn test_pr(number: u64, head: &str) -> PullRequest {
    PullRequest {
        repo: RepoId::new("org", "repo"),
        number: PrNumber(number),
        head_sha: Sha::new(head),
        head_ref: format!("feature-{number}"),
        base_ref: "master".to_string(),
        base_sha: Sha::new("base"),
        title: format!("PR {number}"),
        body: String::new(),
        author: "author".to_string(),
        mergeable: MergeableState::Mergeable,
        labels: Vec::new(),
        contexts: Vec::new(),
        link: format!("https://github.com/org/repo/pull/{number}"),
    }
}
