//! In-memory source host.
//!
//! Holds PRs, refs, statuses, comments and membership in a single mutex and
//! records every mutating call so reconciler tests can assert on them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::error::{ScmError, ScmErrorKind};
use super::query::SearchQuery;
use super::{Permission, ScmClient};
use crate::types::{
    Comment, CommentId, MergeOptions, PrNumber, PullRequest, RepoId, Sha, StatusContext,
    StatusInput,
};

/// A recorded status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedStatus {
    pub repo: RepoId,
    pub sha: Sha,
    pub status: StatusInput,
}

/// A recorded merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub repo: RepoId,
    pub number: PrNumber,
    pub options: MergeOptions,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub prs: HashMap<(RepoId, PrNumber), PullRequest>,
    pub refs: HashMap<(RepoId, String), Sha>,
    /// Latest status per context, keyed by commit.
    pub statuses: HashMap<(RepoId, Sha), Vec<StatusContext>>,
    pub issue_comments: HashMap<(RepoId, PrNumber), Vec<Comment>>,
    pub review_comments: HashMap<(RepoId, PrNumber), Vec<Comment>>,
    pub changes: HashMap<(RepoId, PrNumber), Vec<String>>,
    pub collaborators: HashSet<String>,
    /// org -> members
    pub members: HashMap<String, HashSet<String>>,
    pub permissions: HashMap<String, Permission>,
    /// Injected failures for `merge`, keyed by PR number.
    pub merge_errors: HashMap<PrNumber, ScmErrorKind>,

    pub created_statuses: Vec<CreatedStatus>,
    pub merges: Vec<MergeCall>,
    pub created_comments: Vec<(RepoId, PrNumber, String)>,
    pub deleted_comments: Vec<CommentId>,
    pub added_labels: Vec<(RepoId, PrNumber, String)>,
    pub removed_labels: Vec<(RepoId, PrNumber, String)>,
    pub change_requests: usize,
    next_comment_id: u64,
}

#[derive(Debug)]
pub struct FakeScmClient {
    bot_name: String,
    state: Mutex<FakeState>,
}

impl Default for FakeScmClient {
    fn default() -> Self {
        Self::new("lighthouse-bot")
    }
}

impl FakeScmClient {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Locks the state. A poisoned lock is recovered since the state is only
    /// ever mutated by whole-field assignments.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a PR; its base ref resolves to its base SHA unless a
    /// ref was set explicitly.
    pub fn add_pr(&self, pr: PullRequest) {
        let mut state = self.state();
        state
            .refs
            .entry((pr.repo.clone(), pr.base_ref.clone()))
            .or_insert_with(|| pr.base_sha.clone());
        if !pr.contexts.is_empty() {
            state
                .statuses
                .insert((pr.repo.clone(), pr.head_sha.clone()), pr.contexts.clone());
        }
        state.prs.insert((pr.repo.clone(), pr.number), pr);
    }

    pub fn set_ref(&self, repo: &RepoId, branch: &str, sha: &str) {
        self.state()
            .refs
            .insert((repo.clone(), branch.to_string()), Sha::new(sha));
    }

    pub fn set_changes(&self, repo: &RepoId, number: PrNumber, files: &[&str]) {
        self.state().changes.insert(
            (repo.clone(), number),
            files.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn add_collaborator(&self, user: &str) {
        self.state().collaborators.insert(user.to_string());
    }

    pub fn add_member(&self, org: &str, user: &str) {
        self.state()
            .members
            .entry(org.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn set_permission(&self, user: &str, level: Permission) {
        self.state().permissions.insert(user.to_string(), level);
    }

    pub fn add_comment(&self, repo: &RepoId, number: PrNumber, author: &str, body: &str) -> CommentId {
        let mut state = self.state();
        state.next_comment_id += 1;
        let id = CommentId(state.next_comment_id);
        state
            .issue_comments
            .entry((repo.clone(), number))
            .or_default()
            .push(Comment {
                id,
                author: author.to_string(),
                body: body.to_string(),
            });
        id
    }

    pub fn created_statuses(&self) -> Vec<CreatedStatus> {
        self.state().created_statuses.clone()
    }

    pub fn merges(&self) -> Vec<MergeCall> {
        self.state().merges.clone()
    }

    pub fn created_comments(&self) -> Vec<String> {
        self.state()
            .created_comments
            .iter()
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub fn labels(&self, repo: &RepoId, number: PrNumber) -> Vec<String> {
        self.state()
            .prs
            .get(&(repo.clone(), number))
            .map(|pr| pr.labels.clone())
            .unwrap_or_default()
    }
}

fn missing_pr(repo: &RepoId, number: PrNumber) -> ScmError {
    ScmError::not_found(format!("pull request {repo}{number} not found"))
}

#[async_trait]
impl ScmClient for FakeScmClient {
    fn bot_name(&self) -> &str {
        &self.bot_name
    }

    async fn get_pull_request(&self, repo: &RepoId, number: PrNumber) -> Result<PullRequest, ScmError> {
        let state = self.state();
        let mut pr = state
            .prs
            .get(&(repo.clone(), number))
            .cloned()
            .ok_or_else(|| missing_pr(repo, number))?;
        pr.contexts = state
            .statuses
            .get(&(repo.clone(), pr.head_sha.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(pr)
    }

    async fn list_open_pull_requests(&self, query: &SearchQuery) -> Result<Vec<PullRequest>, ScmError> {
        let state = self.state();
        let mut prs: Vec<PullRequest> = state
            .prs
            .values()
            .filter(|pr| query.matches(pr))
            .cloned()
            .map(|mut pr| {
                pr.contexts = state
                    .statuses
                    .get(&(pr.repo.clone(), pr.head_sha.clone()))
                    .cloned()
                    .unwrap_or_default();
                pr
            })
            .collect();
        prs.sort_by(|a, b| (&a.repo, a.number).cmp(&(&b.repo, b.number)));
        Ok(prs)
    }

    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<Sha, ScmError> {
        self.state()
            .refs
            .get(&(repo.clone(), branch.to_string()))
            .cloned()
            .ok_or_else(|| ScmError::not_found(format!("ref heads/{branch} not found in {repo}")))
    }

    async fn get_combined_status(&self, repo: &RepoId, sha: &Sha) -> Result<Vec<StatusContext>, ScmError> {
        Ok(self
            .state()
            .statuses
            .get(&(repo.clone(), sha.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_status(&self, repo: &RepoId, sha: &Sha, status: &StatusInput) -> Result<(), ScmError> {
        let mut state = self.state();
        let contexts = state.statuses.entry((repo.clone(), sha.clone())).or_default();
        contexts.retain(|c| c.context != status.label);
        contexts.push(StatusContext {
            context: status.label.clone(),
            state: status.state,
            description: status.description.clone(),
            target_url: status.target_url.clone(),
        });
        state.created_statuses.push(CreatedStatus {
            repo: repo.clone(),
            sha: sha.clone(),
            status: status.clone(),
        });
        Ok(())
    }

    async fn list_issue_comments(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<Comment>, ScmError> {
        Ok(self
            .state()
            .issue_comments
            .get(&(repo.clone(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_pull_request_comments(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<Comment>, ScmError> {
        Ok(self
            .state()
            .review_comments
            .get(&(repo.clone(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_comment(&self, repo: &RepoId, number: PrNumber, body: &str) -> Result<(), ScmError> {
        let bot = self.bot_name.clone();
        self.add_comment(repo, number, &bot, body);
        self.state()
            .created_comments
            .push((repo.clone(), number, body.to_string()));
        Ok(())
    }

    async fn delete_comment(&self, _repo: &RepoId, id: CommentId) -> Result<(), ScmError> {
        let mut state = self.state();
        for comments in state.issue_comments.values_mut() {
            comments.retain(|c| c.id != id);
        }
        state.deleted_comments.push(id);
        Ok(())
    }

    async fn add_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        let mut state = self.state();
        let pr = state
            .prs
            .get_mut(&(repo.clone(), number))
            .ok_or_else(|| missing_pr(repo, number))?;
        if !pr.has_label(label) {
            pr.labels.push(label.to_string());
        }
        state
            .added_labels
            .push((repo.clone(), number, label.to_string()));
        Ok(())
    }

    async fn remove_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        let mut state = self.state();
        if let Some(pr) = state.prs.get_mut(&(repo.clone(), number)) {
            pr.labels.retain(|l| !l.eq_ignore_ascii_case(label));
        }
        state
            .removed_labels
            .push((repo.clone(), number, label.to_string()));
        Ok(())
    }

    async fn get_issue_labels(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        self.state()
            .prs
            .get(&(repo.clone(), number))
            .map(|pr| pr.labels.clone())
            .ok_or_else(|| missing_pr(repo, number))
    }

    async fn get_pull_request_changes(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        let mut state = self.state();
        state.change_requests += 1;
        Ok(state
            .changes
            .get(&(repo.clone(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn merge(&self, repo: &RepoId, number: PrNumber, options: &MergeOptions) -> Result<(), ScmError> {
        let mut state = self.state();
        if let Some(kind) = state.merge_errors.get(&number) {
            return Err(ScmError::new(*kind, format!("injected merge failure for {number}")));
        }
        let pr = state
            .prs
            .get(&(repo.clone(), number))
            .ok_or_else(|| missing_pr(repo, number))?;
        if pr.head_sha != options.sha {
            return Err(ScmError::new(
                ScmErrorKind::HeadModified,
                "Head branch was modified. Review and try the merge again.",
            ));
        }
        if pr.mergeable == crate::types::MergeableState::Conflicting {
            return Err(ScmError::new(ScmErrorKind::Unmergeable, "Pull Request is not mergeable"));
        }
        state.prs.remove(&(repo.clone(), number));
        state.merges.push(MergeCall {
            repo: repo.clone(),
            number,
            options: options.clone(),
        });
        Ok(())
    }

    async fn is_collaborator(&self, _repo: &RepoId, user: &str) -> Result<bool, ScmError> {
        Ok(self.state().collaborators.contains(user))
    }

    async fn is_member(&self, org: &str, user: &str) -> Result<bool, ScmError> {
        Ok(self
            .state()
            .members
            .get(org)
            .is_some_and(|members| members.contains(user)))
    }

    async fn has_permission(&self, _repo: &RepoId, user: &str, level: Permission) -> Result<bool, ScmError> {
        Ok(self
            .state()
            .permissions
            .get(user)
            .is_some_and(|have| *have >= level))
    }
}
