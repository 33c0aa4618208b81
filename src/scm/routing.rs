//! A client that picks a per-owner client for each call.
//!
//! With GitHub App credentials every owner has its own installation token, so
//! the webhook side cannot hold a single client. `OwnerRoutedClient` resolves
//! the owner from the call's repository (or org), builds a client from that
//! owner's token on first use and caches it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::error::{ScmError, ScmErrorKind};
use super::owners::OwnerTokensDir;
use super::query::SearchQuery;
use super::{Permission, ScmClient, SharedScmClient};
use crate::types::{
    Comment, CommentId, MergeOptions, PrNumber, PullRequest, RepoId, Sha, StatusContext,
    StatusInput,
};

/// Builds a client from an owner's token.
pub type TokenClientFactory = Arc<dyn Fn(&str) -> Result<SharedScmClient, ScmError> + Send + Sync>;

pub struct OwnerRoutedClient {
    bot_name: String,
    tokens: OwnerTokensDir,
    factory: TokenClientFactory,
    clients: Mutex<HashMap<String, SharedScmClient>>,
}

impl OwnerRoutedClient {
    pub fn new(bot_name: impl Into<String>, tokens: OwnerTokensDir, factory: TokenClientFactory) -> Self {
        Self {
            bot_name: bot_name.into(),
            tokens,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, owner: &str) -> Result<SharedScmClient, ScmError> {
        let key = owner.to_ascii_lowercase();
        if let Some(client) = self.clients.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(client.clone());
        }
        let token = self.tokens.find_token(owner)?.ok_or_else(|| {
            ScmError::new(ScmErrorKind::Unauthorized, format!("no installation token for owner {owner}"))
        })?;
        let client = (self.factory)(&token)?;
        debug!(owner, "created client for owner");
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, client.clone());
        Ok(client)
    }

    fn repo_client(&self, repo: &RepoId) -> Result<SharedScmClient, ScmError> {
        self.client_for(&repo.owner)
    }

    /// Drops cached clients so rotated tokens are picked up.
    pub fn reset(&self) {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn query_owner(query: &SearchQuery) -> Option<&str> {
    query
        .orgs
        .first()
        .map(String::as_str)
        .or_else(|| query.repos.first().and_then(|r| r.split('/').next()))
}

#[async_trait]
impl ScmClient for OwnerRoutedClient {
    fn bot_name(&self) -> &str {
        &self.bot_name
    }

    async fn get_pull_request(&self, repo: &RepoId, number: PrNumber) -> Result<PullRequest, ScmError> {
        self.repo_client(repo)?.get_pull_request(repo, number).await
    }

    async fn list_open_pull_requests(&self, query: &SearchQuery) -> Result<Vec<PullRequest>, ScmError> {
        let owner = query_owner(query)
            .ok_or_else(|| ScmError::permanent("query names no org or repo to route by"))?;
        self.client_for(owner)?.list_open_pull_requests(query).await
    }

    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<Sha, ScmError> {
        self.repo_client(repo)?.get_ref(repo, branch).await
    }

    async fn get_combined_status(&self, repo: &RepoId, sha: &Sha) -> Result<Vec<StatusContext>, ScmError> {
        self.repo_client(repo)?.get_combined_status(repo, sha).await
    }

    async fn create_status(&self, repo: &RepoId, sha: &Sha, status: &StatusInput) -> Result<(), ScmError> {
        self.repo_client(repo)?.create_status(repo, sha, status).await
    }

    async fn list_issue_comments(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<Comment>, ScmError> {
        self.repo_client(repo)?.list_issue_comments(repo, number).await
    }

    async fn list_pull_request_comments(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<Comment>, ScmError> {
        self.repo_client(repo)?.list_pull_request_comments(repo, number).await
    }

    async fn create_comment(&self, repo: &RepoId, number: PrNumber, body: &str) -> Result<(), ScmError> {
        self.repo_client(repo)?.create_comment(repo, number, body).await
    }

    async fn delete_comment(&self, repo: &RepoId, id: CommentId) -> Result<(), ScmError> {
        self.repo_client(repo)?.delete_comment(repo, id).await
    }

    async fn add_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        self.repo_client(repo)?.add_label(repo, number, label).await
    }

    async fn remove_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        self.repo_client(repo)?.remove_label(repo, number, label).await
    }

    async fn get_issue_labels(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        self.repo_client(repo)?.get_issue_labels(repo, number).await
    }

    async fn get_pull_request_changes(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        self.repo_client(repo)?.get_pull_request_changes(repo, number).await
    }

    async fn merge(&self, repo: &RepoId, number: PrNumber, options: &MergeOptions) -> Result<(), ScmError> {
        self.repo_client(repo)?.merge(repo, number, options).await
    }

    async fn is_collaborator(&self, repo: &RepoId, user: &str) -> Result<bool, ScmError> {
        self.repo_client(repo)?.is_collaborator(repo, user).await
    }

    async fn is_member(&self, org: &str, user: &str) -> Result<bool, ScmError> {
        self.client_for(org)?.is_member(org, user).await
    }

    async fn has_permission(&self, repo: &RepoId, user: &str, level: Permission) -> Result<bool, ScmError> {
        self.repo_client(repo)?.has_permission(repo, user, level).await
    }
}
