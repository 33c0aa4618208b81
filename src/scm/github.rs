//! GitHub driver over octocrab.
//!
//! All calls go through octocrab's generic REST helpers with small local
//! response structs, so only the fields the controllers read are decoded.
//! Reads and idempotent writes are retried on transient errors; comments and
//! merges are attempted once.

use async_trait::async_trait;
use axum::http::header::HeaderName;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::auth::AuthMode;
use super::error::{ScmError, ScmErrorKind, classify};
use super::query::SearchQuery;
use super::retry::{RetryConfig, retry_with_backoff};
use super::{Permission, ScmClient};
use crate::types::{
    Comment, CommentId, MergeOptions, MergeableState, PrNumber, PullRequest, RepoId, Sha,
    StatusContext, StatusInput, StatusState,
};

const PER_PAGE: usize = 100;

pub struct GithubClient {
    client: Octocrab,
    bot_name: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("bot_name", &self.bot_name)
            .finish_non_exhaustive()
    }
}

/// The REST base for a server URL: `api.github.com` for github.com, the
/// `/api/v3` prefix for Enterprise.
pub fn api_base(server: &str) -> String {
    let server = server.trim_end_matches('/');
    match server {
        "" | "https://github.com" | "http://github.com" | "https://api.github.com" => {
            "https://api.github.com".to_string()
        }
        other if other.ends_with("/api/v3") => other.to_string(),
        other => format!("{other}/api/v3"),
    }
}

impl GithubClient {
    pub fn new(server: &str, bot_name: &str, token: &str, auth: AuthMode) -> Result<Self, ScmError> {
        let mut builder = Octocrab::builder()
            .base_uri(api_base(server))
            .map_err(ScmError::from_octocrab)?;
        for (name, value) in auth.headers(token) {
            builder = builder.add_header(HeaderName::from_static(name), value);
        }
        let client = builder.build().map_err(ScmError::from_octocrab)?;
        Ok(Self {
            client,
            bot_name: bot_name.to_string(),
            retry: RetryConfig::DEFAULT,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        params: Option<&[(&str, String)]>,
    ) -> Result<T, ScmError> {
        retry_with_backoff(self.retry, || async {
            let value: T = self
                .client
                .get(route, params)
                .await
                .map_err(ScmError::from_octocrab)?;
            Ok(value)
        })
        .await
    }

    async fn get_paged<T: DeserializeOwned>(&self, route: &str) -> Result<Vec<T>, ScmError> {
        let mut page = 1u32;
        let mut all = Vec::new();
        loop {
            let params = [("per_page", PER_PAGE.to_string()), ("page", page.to_string())];
            let items: Vec<T> = self.get_json(route, Some(&params)).await?;
            let last = items.len() < PER_PAGE;
            all.extend(items);
            if last {
                return Ok(all);
            }
            page += 1;
        }
    }

    async fn post_json<B: Serialize + Sync>(&self, route: &str, body: &B) -> Result<(), ScmError> {
        let _: serde_json::Value = self
            .client
            .post(route, Some(body))
            .await
            .map_err(ScmError::from_octocrab)?;
        Ok(())
    }

    /// Issues a GET whose answer is carried by the status code alone.
    async fn probe(&self, route: &str) -> Result<bool, ScmError> {
        retry_with_backoff(self.retry, || async {
            let response = self
                .client
                ._get(route)
                .await
                .map_err(ScmError::from_octocrab)?;
            match response.status().as_u16() {
                204 | 200 => Ok(true),
                404 | 302 => Ok(false),
                code => Err(ScmError {
                    kind: classify(Some(code), ""),
                    status_code: Some(code),
                    message: format!("unexpected status from {route}"),
                    source: None,
                }),
            }
        })
        .await
    }

    async fn delete(&self, route: &str) -> Result<(), ScmError> {
        let response = self
            .client
            ._delete(route, None::<&()>)
            .await
            .map_err(ScmError::from_octocrab)?;
        let code = response.status().as_u16();
        if (200..300).contains(&code) {
            Ok(())
        } else {
            Err(ScmError {
                kind: classify(Some(code), ""),
                status_code: Some(code),
                message: format!("DELETE {route} failed"),
                source: None,
            })
        }
    }

    async fn pull_with_status(&self, repo: &RepoId, raw: RawPull) -> Result<PullRequest, ScmError> {
        let mut pr = raw.into_pull_request(repo);
        pr.contexts = self.get_combined_status(repo, &pr.head_sha).await?;
        Ok(pr)
    }
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
struct RawBranch {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPull {
    number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    mergeable: Option<bool>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    html_url: Option<String>,
    head: RawBranch,
    base: RawBranch,
}

impl RawPull {
    pub(crate) fn into_pull_request(self, repo: &RepoId) -> PullRequest {
        PullRequest {
            repo: repo.clone(),
            number: PrNumber(self.number),
            head_sha: Sha::new(self.head.sha),
            head_ref: self.head.ref_field,
            base_ref: self.base.ref_field,
            base_sha: Sha::new(self.base.sha),
            title: self.title.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            author: self.user.map(|u| u.login).unwrap_or_default(),
            mergeable: match self.mergeable {
                Some(true) => MergeableState::Mergeable,
                Some(false) => MergeableState::Conflicting,
                None => MergeableState::Unknown,
            },
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            contexts: Vec::new(),
            link: self.html_url.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    body: Option<String>,
}

impl From<RawComment> for Comment {
    fn from(c: RawComment) -> Self {
        Comment {
            id: CommentId(c.id),
            author: c.user.map(|u| u.login).unwrap_or_default(),
            body: c.body.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    context: String,
    state: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCombinedStatus {
    #[serde(default)]
    statuses: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
struct RawSearchItem {
    number: u64,
    repository_url: String,
}

#[derive(Debug, Deserialize)]
struct RawSearch {
    #[serde(default)]
    items: Vec<RawSearchItem>,
}

#[derive(Debug, Deserialize)]
struct RawRefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    object: RawRefObject,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RawPermission {
    permission: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Extracts `owner/repo` from an API repository URL.
fn repo_from_api_url(url: &str) -> Option<RepoId> {
    let idx = url.rfind("/repos/")?;
    RepoId::parse(&url[idx + "/repos/".len()..])
}

/// Percent-encodes a path segment.
fn encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl ScmClient for GithubClient {
    fn bot_name(&self) -> &str {
        &self.bot_name
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_pull_request(&self, repo: &RepoId, number: PrNumber) -> Result<PullRequest, ScmError> {
        let route = format!("/repos/{}/{}/pulls/{}", repo.owner, repo.repo, number.0);
        let raw: RawPull = self.get_json(&route, None).await?;
        self.pull_with_status(repo, raw).await
    }

    #[instrument(skip(self, query))]
    async fn list_open_pull_requests(&self, query: &SearchQuery) -> Result<Vec<PullRequest>, ScmError> {
        let q = query.render();
        let mut page = 1u32;
        let mut found = Vec::new();
        loop {
            let params = [
                ("q", q.clone()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let result: RawSearch = self.get_json("/search/issues", Some(&params)).await?;
            let last = result.items.len() < PER_PAGE;
            found.extend(result.items);
            if last {
                break;
            }
            page += 1;
        }
        debug!(query = %q, hits = found.len(), "search complete");

        let mut prs = Vec::with_capacity(found.len());
        for item in found {
            let Some(repo) = repo_from_api_url(&item.repository_url) else {
                continue;
            };
            prs.push(self.get_pull_request(&repo, PrNumber(item.number)).await?);
        }
        Ok(prs)
    }

    async fn get_ref(&self, repo: &RepoId, branch: &str) -> Result<Sha, ScmError> {
        let route = format!("/repos/{}/{}/git/ref/heads/{}", repo.owner, repo.repo, branch);
        let raw: RawRef = self.get_json(&route, None).await?;
        Ok(Sha::new(raw.object.sha))
    }

    async fn get_combined_status(&self, repo: &RepoId, sha: &Sha) -> Result<Vec<StatusContext>, ScmError> {
        let route = format!("/repos/{}/{}/commits/{}/status", repo.owner, repo.repo, sha);
        let raw: RawCombinedStatus = self.get_json(&route, None).await?;
        Ok(raw
            .statuses
            .into_iter()
            .map(|s| StatusContext {
                context: s.context,
                state: StatusState::parse(&s.state),
                description: s.description.unwrap_or_default(),
                target_url: s.target_url.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_status(&self, repo: &RepoId, sha: &Sha, status: &StatusInput) -> Result<(), ScmError> {
        #[derive(Serialize)]
        struct Body<'a> {
            state: &'a str,
            context: &'a str,
            description: &'a str,
            #[serde(skip_serializing_if = "str::is_empty")]
            target_url: &'a str,
        }
        let route = format!("/repos/{}/{}/statuses/{}", repo.owner, repo.repo, sha);
        let body = Body {
            state: status.state.as_str(),
            context: &status.label,
            description: &status.description,
            target_url: &status.target_url,
        };
        retry_with_backoff(self.retry, || self.post_json(&route, &body)).await
    }

    async fn list_issue_comments(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<Comment>, ScmError> {
        let route = format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.repo, number.0);
        let raw: Vec<RawComment> = self.get_paged(&route).await?;
        Ok(raw.into_iter().map(Comment::from).collect())
    }

    async fn list_pull_request_comments(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<Comment>, ScmError> {
        let route = format!("/repos/{}/{}/pulls/{}/comments", repo.owner, repo.repo, number.0);
        let raw: Vec<RawComment> = self.get_paged(&route).await?;
        Ok(raw.into_iter().map(Comment::from).collect())
    }

    async fn create_comment(&self, repo: &RepoId, number: PrNumber, body: &str) -> Result<(), ScmError> {
        let route = format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.repo, number.0);
        self.post_json(&route, &serde_json::json!({ "body": body })).await
    }

    async fn delete_comment(&self, repo: &RepoId, id: CommentId) -> Result<(), ScmError> {
        let route = format!("/repos/{}/{}/issues/comments/{}", repo.owner, repo.repo, id.0);
        self.delete(&route).await
    }

    async fn add_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        let route = format!("/repos/{}/{}/issues/{}/labels", repo.owner, repo.repo, number.0);
        let body = serde_json::json!({ "labels": [label] });
        retry_with_backoff(self.retry, || self.post_json(&route, &body)).await
    }

    async fn remove_label(&self, repo: &RepoId, number: PrNumber, label: &str) -> Result<(), ScmError> {
        let route = format!(
            "/repos/{}/{}/issues/{}/labels/{}",
            repo.owner,
            repo.repo,
            number.0,
            encode_segment(label)
        );
        match self.delete(&route).await {
            Err(e) if e.kind == ScmErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn get_issue_labels(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        let route = format!("/repos/{}/{}/issues/{}/labels", repo.owner, repo.repo, number.0);
        let raw: Vec<RawLabel> = self.get_paged(&route).await?;
        Ok(raw.into_iter().map(|l| l.name).collect())
    }

    async fn get_pull_request_changes(&self, repo: &RepoId, number: PrNumber) -> Result<Vec<String>, ScmError> {
        let route = format!("/repos/{}/{}/pulls/{}/files", repo.owner, repo.repo, number.0);
        let raw: Vec<RawFile> = self.get_paged(&route).await?;
        Ok(raw.into_iter().map(|f| f.filename).collect())
    }

    #[instrument(skip(self, options), fields(repo = %repo, pr = %number, method = %options.method))]
    async fn merge(&self, repo: &RepoId, number: PrNumber, options: &MergeOptions) -> Result<(), ScmError> {
        #[derive(Serialize)]
        struct MergeRequest<'a> {
            commit_title: &'a str,
            commit_message: &'a str,
            sha: &'a str,
            merge_method: &'static str,
        }
        let route = format!("/repos/{}/{}/pulls/{}/merge", repo.owner, repo.repo, number.0);
        let request = MergeRequest {
            commit_title: &options.title,
            commit_message: &options.body,
            sha: options.sha.as_str(),
            merge_method: options.method.as_str(),
        };
        let response: MergeResponse = self
            .client
            .put(&route, Some(&request))
            .await
            .map_err(ScmError::from_merge_failure)?;
        if response.merged {
            Ok(())
        } else {
            Err(ScmError::new(
                ScmErrorKind::Unmergeable,
                response
                    .message
                    .unwrap_or_else(|| "merge returned merged=false".to_string()),
            ))
        }
    }

    async fn is_collaborator(&self, repo: &RepoId, user: &str) -> Result<bool, ScmError> {
        let route = format!("/repos/{}/{}/collaborators/{}", repo.owner, repo.repo, user);
        self.probe(&route).await
    }

    async fn is_member(&self, org: &str, user: &str) -> Result<bool, ScmError> {
        self.probe(&format!("/orgs/{org}/members/{user}")).await
    }

    async fn has_permission(&self, repo: &RepoId, user: &str, level: Permission) -> Result<bool, ScmError> {
        let route = format!(
            "/repos/{}/{}/collaborators/{}/permission",
            repo.owner, repo.repo, user
        );
        match self.get_json::<RawPermission>(&route, None).await {
            Ok(raw) => Ok(Permission::parse(&raw.permission) >= level),
            Err(e) if e.kind == ScmErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_for_servers() {
        assert_eq!(api_base("https://github.com"), "https://api.github.com");
        assert_eq!(api_base("https://github.com/"), "https://api.github.com");
        assert_eq!(api_base("https://ghe.acme.io"), "https://ghe.acme.io/api/v3");
        assert_eq!(api_base("https://ghe.acme.io/api/v3"), "https://ghe.acme.io/api/v3");
    }

    #[test]
    fn repo_from_search_item_url() {
        assert_eq!(
            repo_from_api_url("https://api.github.com/repos/acme/widgets"),
            Some(RepoId::new("acme", "widgets"))
        );
        assert_eq!(repo_from_api_url("https://api.github.com/users/x"), None);
    }

    #[test]
    fn encodes_label_segments() {
        assert_eq!(encode_segment("do-not-merge/hold"), "do-not-merge%2Fhold");
        assert_eq!(encode_segment("needs ok"), "needs%20ok");
    }

    #[test]
    fn raw_pull_conversion() {
        let json = serde_json::json!({
            "number": 12,
            "title": "Add thing",
            "body": null,
            "user": {"login": "dev"},
            "mergeable": false,
            "labels": [{"name": "lgtm"}],
            "html_url": "https://github.com/acme/w/pull/12",
            "head": {"ref": "feature", "sha": "abc"},
            "base": {"ref": "main", "sha": "def"}
        });
        let raw: RawPull = serde_json::from_value(json).unwrap();
        let pr = raw.into_pull_request(&RepoId::new("acme", "w"));
        assert_eq!(pr.number, PrNumber(12));
        assert_eq!(pr.mergeable, MergeableState::Conflicting);
        assert_eq!(pr.author, "dev");
        assert_eq!(pr.labels, vec!["lgtm".to_string()]);
        assert_eq!(pr.base_sha, Sha::new("def"));
        assert_eq!(pr.body, "");
    }
}
