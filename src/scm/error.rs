//! Source-host error types.
//!
//! Every host call surfaces an `ScmError` carrying a kind. Callers branch on
//! the kind, never on the message:
//!
//! - **Transient** errors (5xx, rate limits, timeouts) are retried with backoff
//!   and, failing that, requeued by the work queue.
//! - **Unmergeable** and **HeadModified** affect a single PR; a batch merge
//!   continues with the next PR.
//! - **Unauthorized** and **MergeMethodForbidden** abort a batch merge.
//! - **NotFound** and **Permanent** are reported and not retried.

use std::fmt;
use thiserror::Error;

/// Classification of a source-host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScmErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// The requested object does not exist.
    NotFound,

    /// Authentication failed or the bot lacks permission for the operation.
    Unauthorized,

    /// The PR cannot be merged as-is (conflicts, missing reviews, failing
    /// required checks on the host side).
    Unmergeable,

    /// The PR head moved away from the SHA we asked to merge.
    HeadModified,

    /// The repository does not allow the requested merge method.
    MergeMethodForbidden,

    /// Any other failure requiring human intervention.
    Permanent,
}

impl ScmErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ScmErrorKind::Transient)
    }

    /// Errors after which a batch merge may continue with the next PR.
    pub fn continues_batch(&self) -> bool {
        !matches!(
            self,
            ScmErrorKind::Unauthorized | ScmErrorKind::MergeMethodForbidden
        )
    }
}

impl fmt::Display for ScmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScmErrorKind::Transient => "transient",
            ScmErrorKind::NotFound => "not found",
            ScmErrorKind::Unauthorized => "unauthorized",
            ScmErrorKind::Unmergeable => "unmergeable",
            ScmErrorKind::HeadModified => "head modified",
            ScmErrorKind::MergeMethodForbidden => "merge method forbidden",
            ScmErrorKind::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// A source-host error with a kind for retry and batch decisions.
#[derive(Debug, Error)]
pub struct ScmError {
    pub kind: ScmErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for ScmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} host error (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{} host error: {}", self.kind, self.message),
        }
    }
}

impl ScmError {
    pub fn new(kind: ScmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::Permanent, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ScmErrorKind::NotFound, message)
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    /// Categorizes an octocrab error from a non-merge call.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = status_code_of(&err);
        let message = match &err {
            octocrab::Error::GitHub { source, .. } => source.message.clone(),
            other => other.to_string(),
        };
        let kind = classify(status_code, &message);
        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }

    /// Categorizes an octocrab error from a merge call, where 405 and 409
    /// carry merge-specific meanings.
    pub fn from_merge_failure(err: octocrab::Error) -> Self {
        let mut e = Self::from_octocrab(err);
        if let Some(kind) = classify_merge(e.status_code, &e.message) {
            e.kind = kind;
        }
        e
    }
}

fn status_code_of(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Maps a status code and message onto an error kind.
pub(crate) fn classify(status_code: Option<u16>, message: &str) -> ScmErrorKind {
    if is_transient_message(message) {
        return ScmErrorKind::Transient;
    }
    match status_code {
        Some(429) => ScmErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => ScmErrorKind::Transient,
        Some(401) | Some(403) => ScmErrorKind::Unauthorized,
        Some(404) => ScmErrorKind::NotFound,
        Some(code) if (500..600).contains(&code) => ScmErrorKind::Transient,
        Some(_) => ScmErrorKind::Permanent,
        None if is_network_error(message) => ScmErrorKind::Transient,
        None => ScmErrorKind::Permanent,
    }
}

/// Merge-specific classification. Returns `None` when the generic rules apply.
pub(crate) fn classify_merge(status_code: Option<u16>, message: &str) -> Option<ScmErrorKind> {
    let lower = message.to_lowercase();
    if lower.contains("head branch was modified") {
        return Some(ScmErrorKind::HeadModified);
    }
    if lower.contains("merge commits are not allowed")
        || lower.contains("squash merges are not allowed")
        || lower.contains("rebase merges are not allowed")
        || lower.contains("merge method is not allowed")
    {
        return Some(ScmErrorKind::MergeMethodForbidden);
    }
    match status_code {
        Some(405) => Some(ScmErrorKind::Unmergeable),
        Some(409) => Some(ScmErrorKind::HeadModified),
        Some(422) if lower.contains("not mergeable") => Some(ScmErrorKind::Unmergeable),
        _ => None,
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    (lower.contains("required status check") && lower.contains("expected"))
        || lower.contains("base branch was modified")
        || lower.contains("try again")
}

fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("api rate")
        || lower.contains("secondary rate")
        || lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
}
