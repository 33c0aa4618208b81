//! Typed webhook payloads.
//!
//! Only the kinds the plugins act on get a dedicated variant. Everything else
//! parses to `Webhook::Other` so that it can still be acknowledged and routed
//! by kind.
//!
//! Comment-like events (issue comments, reviews, PR comments and review
//! comments) are additionally normalised into a [`GenericComment`], which is
//! what the command plugins consume.

use serde::{Deserialize, Serialize};

use super::kind::WebhookKind;
use crate::types::{Comment, PrNumber, PullRequest, RepoId, Sha};

/// Action performed on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    Reopened,
    Synchronize,
    Edited,
    Closed,
    Labeled,
    Unlabeled,
    /// Any action the plugins do not distinguish.
    Other(String),
}

impl PrAction {
    pub fn parse(s: &str) -> Self {
        match s {
            "opened" => PrAction::Opened,
            "reopened" => PrAction::Reopened,
            "synchronize" => PrAction::Synchronize,
            "edited" => PrAction::Edited,
            "closed" => PrAction::Closed,
            "labeled" => PrAction::Labeled,
            "unlabeled" => PrAction::Unlabeled,
            other => PrAction::Other(other.to_string()),
        }
    }
}

/// What an `edited` pull request event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrChanges {
    pub base_ref_changed: bool,
    pub base_sha_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestHook {
    pub action: PrAction,
    pub repo: RepoId,
    pub pull_request: PullRequest,
    pub sender: String,
    /// The label added or removed, for `labeled`/`unlabeled`.
    pub label: Option<String>,
    pub changes: PrChanges,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: Sha,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushHook {
    pub repo: RepoId,
    /// Full ref, e.g. `refs/heads/master`.
    pub ref_name: String,
    pub before: Sha,
    pub after: Sha,
    pub created: bool,
    pub deleted: bool,
    pub commits: Vec<PushCommit>,
    pub pusher: String,
    pub compare_link: String,
    pub guid: String,
}

impl PushHook {
    /// The branch pushed to, if the ref is a branch.
    pub fn branch(&self) -> Option<&str> {
        self.ref_name.strip_prefix("refs/heads/")
    }

    /// Union of added, modified and removed paths across all commits.
    pub fn changed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .commits
            .iter()
            .flat_map(|c| c.added.iter().chain(&c.modified).chain(&c.removed))
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
}

impl CommentAction {
    /// Reviews arrive as `submitted`; treat that as a new comment.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" | "submitted" => Some(CommentAction::Created),
            "edited" => Some(CommentAction::Edited),
            "deleted" | "dismissed" => Some(CommentAction::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: PrNumber,
    pub author: String,
    /// `open` or `closed`.
    pub state: String,
    pub is_pr: bool,
    pub link: String,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentHook {
    pub action: CommentAction,
    pub repo: RepoId,
    pub issue: Issue,
    pub comment: Comment,
    pub link: String,
    pub guid: String,
}

/// A review, a PR comment or a review comment: a comment tied to a PR whose
/// full view is in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCommentHook {
    pub action: CommentAction,
    pub repo: RepoId,
    pub pull_request: PullRequest,
    pub comment: Comment,
    pub link: String,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHook {
    pub repo: RepoId,
    pub sha: Sha,
    pub context: String,
    pub state: crate::types::StatusState,
    pub description: String,
    pub target_url: String,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Webhook {
    PullRequest(PullRequestHook),
    Push(PushHook),
    IssueComment(IssueCommentHook),
    Review(PrCommentHook),
    ReviewComment(PrCommentHook),
    PullRequestComment(PrCommentHook),
    Status(StatusHook),
    Other {
        kind: WebhookKind,
        repo: Option<RepoId>,
        guid: String,
    },
}

impl Webhook {
    pub fn kind(&self) -> WebhookKind {
        match self {
            Webhook::PullRequest(_) => WebhookKind::PullRequest,
            Webhook::Push(_) => WebhookKind::Push,
            Webhook::IssueComment(_) => WebhookKind::IssueComment,
            Webhook::Review(_) => WebhookKind::Review,
            Webhook::ReviewComment(_) => WebhookKind::ReviewComment,
            Webhook::PullRequestComment(_) => WebhookKind::PullRequestComment,
            Webhook::Status(_) => WebhookKind::Status,
            Webhook::Other { kind, .. } => *kind,
        }
    }

    pub fn repo(&self) -> Option<&RepoId> {
        match self {
            Webhook::PullRequest(h) => Some(&h.repo),
            Webhook::Push(h) => Some(&h.repo),
            Webhook::IssueComment(h) => Some(&h.repo),
            Webhook::Review(h) | Webhook::ReviewComment(h) | Webhook::PullRequestComment(h) => {
                Some(&h.repo)
            }
            Webhook::Status(h) => Some(&h.repo),
            Webhook::Other { repo, .. } => repo.as_ref(),
        }
    }

    pub fn guid(&self) -> &str {
        match self {
            Webhook::PullRequest(h) => &h.guid,
            Webhook::Push(h) => &h.guid,
            Webhook::IssueComment(h) => &h.guid,
            Webhook::Review(h) | Webhook::ReviewComment(h) | Webhook::PullRequestComment(h) => {
                &h.guid
            }
            Webhook::Status(h) => &h.guid,
            Webhook::Other { guid, .. } => guid,
        }
    }

    /// The comment-shaped view of this event, if it is comment-like.
    pub fn generic_comment(&self) -> Option<GenericComment> {
        match self {
            Webhook::IssueComment(h) => Some(GenericComment {
                action: h.action,
                is_pr: h.issue.is_pr,
                issue_state: h.issue.state.clone(),
                author: h.comment.author.clone(),
                issue_author: h.issue.author.clone(),
                body: h.comment.body.clone(),
                link: h.link.clone(),
                repo: h.repo.clone(),
                assignees: h.issue.assignees.clone(),
                number: h.issue.number,
                labels: h.issue.labels.clone(),
                head_sha: None,
                guid: h.guid.clone(),
            }),
            Webhook::Review(h) | Webhook::ReviewComment(h) | Webhook::PullRequestComment(h) => {
                Some(GenericComment {
                    action: h.action,
                    is_pr: true,
                    issue_state: "open".to_string(),
                    author: h.comment.author.clone(),
                    issue_author: h.pull_request.author.clone(),
                    body: h.comment.body.clone(),
                    link: h.link.clone(),
                    repo: h.repo.clone(),
                    assignees: Vec::new(),
                    number: h.pull_request.number,
                    labels: h.pull_request.labels.clone(),
                    head_sha: Some(h.pull_request.head_sha.clone()),
                    guid: h.guid.clone(),
                })
            }
            _ => None,
        }
    }
}

/// The common shape of every comment-like event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericComment {
    pub action: CommentAction,
    pub is_pr: bool,
    pub issue_state: String,
    pub author: String,
    pub issue_author: String,
    pub body: String,
    pub link: String,
    pub repo: RepoId,
    pub assignees: Vec<String>,
    pub number: PrNumber,
    pub labels: Vec<String>,
    /// Known when the payload carried the PR itself.
    pub head_sha: Option<Sha>,
    pub guid: String,
}

impl GenericComment {
    pub fn is_open(&self) -> bool {
        self.issue_state == "open"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(added: &[&str], modified: &[&str], removed: &[&str]) -> PushCommit {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        PushCommit {
            id: Sha::new("c"),
            added: v(added),
            modified: v(modified),
            removed: v(removed),
        }
    }

    #[test]
    fn push_changed_files_is_the_union() {
        let push = PushHook {
            repo: RepoId::new("org", "repo"),
            ref_name: "refs/heads/master".to_string(),
            before: Sha::new("a"),
            after: Sha::new("b"),
            created: false,
            deleted: false,
            commits: vec![
                commit(&["new.rs"], &["lib.rs"], &[]),
                commit(&[], &["lib.rs"], &["old.rs"]),
            ],
            pusher: "someone".to_string(),
            compare_link: String::new(),
            guid: "g".to_string(),
        };
        assert_eq!(push.branch(), Some("master"));
        assert_eq!(push.changed_files(), vec!["lib.rs", "new.rs", "old.rs"]);
    }

    #[test]
    fn tag_pushes_have_no_branch() {
        let push = PushHook {
            repo: RepoId::new("org", "repo"),
            ref_name: "refs/tags/v1".to_string(),
            before: Sha::new("a"),
            after: Sha::new("b"),
            created: true,
            deleted: false,
            commits: Vec::new(),
            pusher: String::new(),
            compare_link: String::new(),
            guid: String::new(),
        };
        assert_eq!(push.branch(), None);
    }

    #[test]
    fn review_actions_map_onto_comment_actions() {
        assert_eq!(CommentAction::parse("submitted"), Some(CommentAction::Created));
        assert_eq!(CommentAction::parse("dismissed"), Some(CommentAction::Deleted));
        assert_eq!(CommentAction::parse("pinned"), None);
    }
}
