//! GitHub webhook payload parser.
//!
//! The kind comes from the event header (already mapped onto
//! [`WebhookKind`]); the payload is parsed according to it. Kinds without a
//! dedicated variant parse to [`Webhook::Other`], carrying the repository if
//! the payload names one. Malformed payloads of known kinds are errors.

use serde::Deserialize;
use thiserror::Error;

use super::events::{
    CommentAction, Issue, IssueCommentHook, PrAction, PrChanges, PrCommentHook, PullRequestHook,
    PushCommit, PushHook, StatusHook, Webhook,
};
use super::kind::WebhookKind;
use crate::scm::github::RawPull;
use crate::types::{Comment, CommentId, PrNumber, RepoId, Sha, StatusState};

#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

pub fn parse_webhook(kind: WebhookKind, guid: &str, payload: &[u8]) -> Result<Webhook, ParseError> {
    match kind {
        WebhookKind::PullRequest => parse_pull_request(guid, payload).map(Webhook::PullRequest),
        WebhookKind::Push => parse_push(guid, payload).map(Webhook::Push),
        WebhookKind::IssueComment => parse_issue_comment(guid, payload).map(Webhook::IssueComment),
        WebhookKind::Review => parse_review(guid, payload).map(Webhook::Review),
        WebhookKind::ReviewComment => parse_pr_comment(guid, payload).map(Webhook::ReviewComment),
        WebhookKind::PullRequestComment => {
            parse_pr_comment(guid, payload).map(Webhook::PullRequestComment)
        }
        WebhookKind::Status => parse_status(guid, payload).map(Webhook::Status),
        other => {
            let raw: RawAny = serde_json::from_slice(payload)?;
            Ok(Webhook::Other {
                kind: other,
                repo: raw.repository.map(RawRepository::into_repo),
                guid: guid.to_string(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    owner: RawOwner,
    name: String,
}

impl RawRepository {
    fn into_repo(self) -> RepoId {
        RepoId::new(self.owner.login.or(self.owner.name).unwrap_or_default(), self.name)
    }
}

/// Push payloads name the owner with `name`, everything else with `login`.
#[derive(Debug, Deserialize)]
struct RawOwner {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawAny {
    #[serde(default)]
    repository: Option<RawRepository>,
}

#[derive(Debug, Deserialize)]
struct RawFrom {
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBaseChanges {
    #[serde(default, rename = "ref")]
    ref_field: Option<RawFrom>,
    #[serde(default)]
    sha: Option<RawFrom>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChanges {
    #[serde(default)]
    base: Option<RawBaseChanges>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPull,
    repository: RawRepository,
    #[serde(default)]
    sender: Option<RawUser>,
    #[serde(default)]
    label: Option<RawLabel>,
    #[serde(default)]
    changes: Option<RawChanges>,
}

fn parse_pull_request(guid: &str, payload: &[u8]) -> Result<PullRequestHook, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;
    let repo = raw.repository.into_repo();
    let base = raw.changes.and_then(|c| c.base).unwrap_or_default();
    Ok(PullRequestHook {
        action: PrAction::parse(&raw.action),
        pull_request: raw.pull_request.into_pull_request(&repo),
        repo,
        sender: raw.sender.map(|s| s.login).unwrap_or_default(),
        label: raw.label.map(|l| l.name),
        changes: PrChanges {
            base_ref_changed: base.ref_field.is_some_and(|f| f.from.is_some()),
            base_sha_changed: base.sha.is_some_and(|f| f.from.is_some()),
        },
        guid: guid.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RawPushCommit {
    id: String,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPusher {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    ref_field: String,
    before: String,
    after: String,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    commits: Vec<RawPushCommit>,
    #[serde(default)]
    pusher: Option<RawPusher>,
    #[serde(default)]
    compare: Option<String>,
    repository: RawRepository,
}

fn parse_push(guid: &str, payload: &[u8]) -> Result<PushHook, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;
    if raw.ref_field.is_empty() {
        return Err(ParseError::InvalidField {
            field: "ref",
            value: raw.ref_field,
        });
    }
    Ok(PushHook {
        repo: raw.repository.into_repo(),
        ref_name: raw.ref_field,
        before: Sha::new(raw.before),
        after: Sha::new(raw.after),
        created: raw.created,
        deleted: raw.deleted,
        commits: raw
            .commits
            .into_iter()
            .map(|c| PushCommit {
                id: Sha::new(c.id),
                added: c.added,
                modified: c.modified,
                removed: c.removed,
            })
            .collect(),
        pusher: raw.pusher.map(|p| p.name).unwrap_or_default(),
        compare_link: raw.compare.unwrap_or_default(),
        guid: guid.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    user: RawUser,
    #[serde(default)]
    html_url: Option<String>,
}

impl RawComment {
    fn into_comment(self) -> (Comment, String) {
        (
            Comment {
                id: CommentId(self.id),
                author: self.user.login,
                body: self.body.unwrap_or_default(),
            },
            self.html_url.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    user: RawUser,
    #[serde(default)]
    state: Option<String>,
    // Present only when the issue is a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    assignees: Vec<RawUser>,
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

fn comment_action(action: &str) -> Result<CommentAction, ParseError> {
    CommentAction::parse(action).ok_or_else(|| ParseError::InvalidField {
        field: "action",
        value: action.to_string(),
    })
}

fn parse_issue_comment(guid: &str, payload: &[u8]) -> Result<IssueCommentHook, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;
    let action = comment_action(&raw.action)?;
    let (comment, link) = raw.comment.into_comment();
    Ok(IssueCommentHook {
        action,
        repo: raw.repository.into_repo(),
        issue: Issue {
            number: PrNumber(raw.issue.number),
            author: raw.issue.user.login,
            state: raw.issue.state.unwrap_or_else(|| "open".to_string()),
            is_pr: raw.issue.pull_request.is_some(),
            link: raw.issue.html_url.unwrap_or_default(),
            assignees: raw.issue.assignees.into_iter().map(|u| u.login).collect(),
            labels: raw.issue.labels.into_iter().map(|l| l.name).collect(),
        },
        comment,
        link,
        guid: guid.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RawReviewPayload {
    action: String,
    review: RawComment,
    pull_request: RawPull,
    repository: RawRepository,
}

fn parse_review(guid: &str, payload: &[u8]) -> Result<PrCommentHook, ParseError> {
    let raw: RawReviewPayload = serde_json::from_slice(payload)?;
    let action = comment_action(&raw.action)?;
    let repo = raw.repository.into_repo();
    let (comment, link) = raw.review.into_comment();
    Ok(PrCommentHook {
        action,
        pull_request: raw.pull_request.into_pull_request(&repo),
        repo,
        comment,
        link,
        guid: guid.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RawPrCommentPayload {
    action: String,
    comment: RawComment,
    pull_request: RawPull,
    repository: RawRepository,
}

fn parse_pr_comment(guid: &str, payload: &[u8]) -> Result<PrCommentHook, ParseError> {
    let raw: RawPrCommentPayload = serde_json::from_slice(payload)?;
    let action = comment_action(&raw.action)?;
    let repo = raw.repository.into_repo();
    let (comment, link) = raw.comment.into_comment();
    Ok(PrCommentHook {
        action,
        pull_request: raw.pull_request.into_pull_request(&repo),
        repo,
        comment,
        link,
        guid: guid.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct RawStatusPayload {
    sha: String,
    state: String,
    context: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    target_url: Option<String>,
    repository: RawRepository,
}

fn parse_status(guid: &str, payload: &[u8]) -> Result<StatusHook, ParseError> {
    let raw: RawStatusPayload = serde_json::from_slice(payload)?;
    let state = match raw.state.as_str() {
        "pending" => StatusState::Pending,
        "success" => StatusState::Success,
        "failure" => StatusState::Failure,
        "error" => StatusState::Error,
        other => {
            return Err(ParseError::InvalidField {
                field: "state",
                value: other.to_string(),
            });
        }
    };
    Ok(StatusHook {
        repo: raw.repository.into_repo(),
        sha: Sha::new(raw.sha),
        context: raw.context,
        state,
        description: raw.description.unwrap_or_default(),
        target_url: raw.target_url.unwrap_or_default(),
        guid: guid.to_string(),
    })
}
