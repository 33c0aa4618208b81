//! Source-host client abstraction.
//!
//! `ScmClient` is the single capability interface the controllers use to talk
//! to the repository host. Host differences (URL shapes, auth headers) live in
//! the concrete driver chosen at construction; callers only see typed
//! `ScmError` kinds.

pub mod auth;
pub mod error;
pub mod fake;
pub mod github;
pub mod owners;
pub mod pruner;
pub mod query;
pub mod retry;
pub mod routing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    Comment, CommentId, MergeOptions, PrNumber, PullRequest, RepoId, Sha, StatusContext,
    StatusInput,
};

pub use auth::{AuthMode, GitKind};
pub use error::{ScmError, ScmErrorKind};
pub use owners::OwnerTokensDir;
pub use query::SearchQuery;
pub use retry::RetryConfig;
pub use routing::{OwnerRoutedClient, TokenClientFactory};

/// Repository permission levels, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    None,
    Read,
    Triage,
    Write,
    Maintain,
    Admin,
}

impl Permission {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Permission::Admin,
            "maintain" => Permission::Maintain,
            "write" | "push" => Permission::Write,
            "triage" => Permission::Triage,
            "read" | "pull" => Permission::Read,
            _ => Permission::None,
        }
    }
}

/// Uniform read/write access to a source host.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// The login of the bot account this client acts as.
    fn bot_name(&self) -> &str;

    async fn get_pull_request(&self, repo: &RepoId, number: PrNumber)
    -> Result<PullRequest, ScmError>;

    async fn list_open_pull_requests(&self, query: &SearchQuery)
    -> Result<Vec<PullRequest>, ScmError>;

    /// Resolves a branch to its current SHA.
    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<Sha, ScmError>;

    async fn get_combined_status(&self, repo: &RepoId, sha: &Sha)
    -> Result<Vec<StatusContext>, ScmError>;

    async fn create_status(&self, repo: &RepoId, sha: &Sha, status: &StatusInput)
    -> Result<(), ScmError>;

    async fn list_issue_comments(&self, repo: &RepoId, number: PrNumber)
    -> Result<Vec<Comment>, ScmError>;

    /// Review comments on the diff.
    async fn list_pull_request_comments(&self, repo: &RepoId, number: PrNumber)
    -> Result<Vec<Comment>, ScmError>;

    async fn create_comment(&self, repo: &RepoId, number: PrNumber, body: &str)
    -> Result<(), ScmError>;

    async fn delete_comment(&self, repo: &RepoId, id: CommentId) -> Result<(), ScmError>;

    async fn add_label(&self, repo: &RepoId, number: PrNumber, label: &str)
    -> Result<(), ScmError>;

    async fn remove_label(&self, repo: &RepoId, number: PrNumber, label: &str)
    -> Result<(), ScmError>;

    async fn get_issue_labels(&self, repo: &RepoId, number: PrNumber)
    -> Result<Vec<String>, ScmError>;

    /// Paths of files changed by the PR.
    async fn get_pull_request_changes(&self, repo: &RepoId, number: PrNumber)
    -> Result<Vec<String>, ScmError>;

    async fn merge(&self, repo: &RepoId, number: PrNumber, options: &MergeOptions)
    -> Result<(), ScmError>;

    async fn is_collaborator(&self, repo: &RepoId, user: &str) -> Result<bool, ScmError>;

    async fn is_member(&self, org: &str, user: &str) -> Result<bool, ScmError>;

    async fn has_permission(&self, repo: &RepoId, user: &str, level: Permission)
    -> Result<bool, ScmError>;
}

pub type SharedScmClient = Arc<dyn ScmClient>;

/// Builds the driver for `kind`. Only the GitHub family is implemented.
pub fn new_client(
    kind: GitKind,
    server: &str,
    bot_name: &str,
    token: &str,
) -> Result<SharedScmClient, ScmError> {
    match kind {
        GitKind::Github | GitKind::GithubApp => Ok(Arc::new(github::GithubClient::new(
            server,
            bot_name,
            token,
            kind.default_auth(),
        )?)),
        other => Err(ScmError::permanent(format!("unsupported host kind {other}"))),
    }
}
