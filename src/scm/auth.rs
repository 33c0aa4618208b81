//! Host kinds and authorization modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ScmError;

/// The flavour of source host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitKind {
    #[default]
    Github,
    /// GitHub with per-owner App installation tokens.
    GithubApp,
    Gitlab,
    Gitea,
    BitbucketServer,
    BitbucketCloud,
}

impl GitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitKind::Github => "github",
            GitKind::GithubApp => "githubapp",
            GitKind::Gitlab => "gitlab",
            GitKind::Gitea => "gitea",
            GitKind::BitbucketServer => "bitbucketserver",
            GitKind::BitbucketCloud => "bitbucketcloud",
        }
    }

    /// The default authorization mode for tokens of this kind.
    pub fn default_auth(&self) -> AuthMode {
        match self {
            GitKind::Github | GitKind::Gitea => AuthMode::PersonalToken,
            GitKind::GithubApp => AuthMode::AppInstallation,
            GitKind::Gitlab => AuthMode::PrivateToken,
            GitKind::BitbucketServer | GitKind::BitbucketCloud => AuthMode::OAuthBearer,
        }
    }
}

impl FromStr for GitKind {
    type Err = ScmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "github" => Ok(GitKind::Github),
            "githubapp" => Ok(GitKind::GithubApp),
            "gitlab" => Ok(GitKind::Gitlab),
            "gitea" => Ok(GitKind::Gitea),
            "bitbucketserver" | "stash" => Ok(GitKind::BitbucketServer),
            "bitbucketcloud" | "bitbucket" => Ok(GitKind::BitbucketCloud),
            other => Err(ScmError::permanent(format!("unknown git kind {other:?}"))),
        }
    }
}

impl fmt::Display for GitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the token is presented to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// `authorization: token <t>`
    PersonalToken,
    /// `authorization: Bearer <t>`
    OAuthBearer,
    /// `private-token: <t>`
    PrivateToken,
    /// `authorization: token <t>` plus the machine-man preview media type.
    AppInstallation,
}

impl AuthMode {
    /// Header name/value pairs carrying `token`. Names are lower-case.
    pub fn headers(&self, token: &str) -> Vec<(&'static str, String)> {
        match self {
            AuthMode::PersonalToken => vec![("authorization", format!("token {token}"))],
            AuthMode::OAuthBearer => vec![("authorization", format!("Bearer {token}"))],
            AuthMode::PrivateToken => vec![("private-token", token.to_string())],
            AuthMode::AppInstallation => vec![
                ("authorization", format!("token {token}")),
                (
                    "accept",
                    "application/vnd.github.machine-man-preview+json".to_string(),
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kinds() {
        assert_eq!("GitHub".parse::<GitKind>().unwrap(), GitKind::Github);
        assert_eq!("".parse::<GitKind>().unwrap(), GitKind::Github);
        assert_eq!("stash".parse::<GitKind>().unwrap(), GitKind::BitbucketServer);
        assert!("svn".parse::<GitKind>().is_err());
    }

    #[test]
    fn auth_headers_by_mode() {
        assert_eq!(
            AuthMode::PersonalToken.headers("t"),
            vec![("authorization", "token t".to_string())]
        );
        assert_eq!(
            AuthMode::OAuthBearer.headers("t"),
            vec![("authorization", "Bearer t".to_string())]
        );
        assert_eq!(
            AuthMode::PrivateToken.headers("t"),
            vec![("private-token", "t".to_string())]
        );
        let app = AuthMode::AppInstallation.headers("t");
        assert_eq!(app.len(), 2);
        assert!(app[1].1.contains("machine-man-preview"));
    }

    #[test]
    fn app_kind_uses_installation_auth() {
        assert_eq!(GitKind::GithubApp.default_auth(), AuthMode::AppInstallation);
        assert_eq!(GitKind::Gitlab.default_auth(), AuthMode::PrivateToken);
    }
}
