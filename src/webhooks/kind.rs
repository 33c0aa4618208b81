//! The webhook kinds the dispatcher understands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    Branch,
    CheckRun,
    CheckSuite,
    Deploy,
    DeploymentStatus,
    Fork,
    Installation,
    InstallationRepository,
    Issue,
    IssueComment,
    Label,
    Ping,
    PullRequest,
    PullRequestComment,
    Push,
    Release,
    Repository,
    Review,
    ReviewComment,
    Star,
    Status,
    Tag,
    Watch,
}

impl WebhookKind {
    pub const ALL: [WebhookKind; 23] = [
        WebhookKind::Branch,
        WebhookKind::CheckRun,
        WebhookKind::CheckSuite,
        WebhookKind::Deploy,
        WebhookKind::DeploymentStatus,
        WebhookKind::Fork,
        WebhookKind::Installation,
        WebhookKind::InstallationRepository,
        WebhookKind::Issue,
        WebhookKind::IssueComment,
        WebhookKind::Label,
        WebhookKind::Ping,
        WebhookKind::PullRequest,
        WebhookKind::PullRequestComment,
        WebhookKind::Push,
        WebhookKind::Release,
        WebhookKind::Repository,
        WebhookKind::Review,
        WebhookKind::ReviewComment,
        WebhookKind::Star,
        WebhookKind::Status,
        WebhookKind::Tag,
        WebhookKind::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Branch => "branch",
            WebhookKind::CheckRun => "check_run",
            WebhookKind::CheckSuite => "check_suite",
            WebhookKind::Deploy => "deploy",
            WebhookKind::DeploymentStatus => "deployment_status",
            WebhookKind::Fork => "fork",
            WebhookKind::Installation => "installation",
            WebhookKind::InstallationRepository => "installation_repository",
            WebhookKind::Issue => "issue",
            WebhookKind::IssueComment => "issue_comment",
            WebhookKind::Label => "label",
            WebhookKind::Ping => "ping",
            WebhookKind::PullRequest => "pull_request",
            WebhookKind::PullRequestComment => "pull_request_comment",
            WebhookKind::Push => "push",
            WebhookKind::Release => "release",
            WebhookKind::Repository => "repository",
            WebhookKind::Review => "review",
            WebhookKind::ReviewComment => "review_comment",
            WebhookKind::Star => "star",
            WebhookKind::Status => "status",
            WebhookKind::Tag => "tag",
            WebhookKind::Watch => "watch",
        }
    }

    /// Maps a GitHub `X-GitHub-Event` name onto a kind. Names that already
    /// are kinds map to themselves.
    pub fn from_github_event(event: &str) -> Option<Self> {
        let kind = match event {
            "issues" => WebhookKind::Issue,
            "pull_request_review" => WebhookKind::Review,
            "pull_request_review_comment" => WebhookKind::ReviewComment,
            "create" | "delete" => WebhookKind::Branch,
            "deployment" => WebhookKind::Deploy,
            "installation_repositories" => WebhookKind::InstallationRepository,
            other => return other.parse().ok(),
        };
        Some(kind)
    }

    /// Kinds whose payload carries a comment the plugins read.
    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            WebhookKind::IssueComment
                | WebhookKind::PullRequestComment
                | WebhookKind::Review
                | WebhookKind::ReviewComment
        )
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown webhook kind {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for WebhookKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WebhookKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in WebhookKind::ALL {
            assert_eq!(kind.as_str().parse::<WebhookKind>(), Ok(kind));
        }
        assert!("bogus".parse::<WebhookKind>().is_err());
    }

    #[test]
    fn github_event_names_map_onto_kinds() {
        assert_eq!(WebhookKind::from_github_event("issues"), Some(WebhookKind::Issue));
        assert_eq!(
            WebhookKind::from_github_event("pull_request_review"),
            Some(WebhookKind::Review)
        );
        assert_eq!(WebhookKind::from_github_event("create"), Some(WebhookKind::Branch));
        assert_eq!(
            WebhookKind::from_github_event("issue_comment"),
            Some(WebhookKind::IssueComment)
        );
        assert_eq!(WebhookKind::from_github_event("sponsorship"), None);
    }
}
