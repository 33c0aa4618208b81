//! Process settings read from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::scm::GitKind;
use crate::server::DEFAULT_HOOK_PATH;

pub const DEFAULT_GIT_SERVER: &str = "https://github.com";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/config/config.yaml";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {name} {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read {name} file {path}: {source}")]
    File {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the bot's host credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    /// Per-owner installation tokens under this directory.
    AppSecretDir(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub git_server: String,
    pub git_kind: GitKind,
    pub bot_name: String,
    pub credentials: Credentials,
    pub hmac_secret: String,
    pub report_url_base: Option<String>,
    pub service_account: Option<String>,
    pub default_image: Option<String>,
    pub config_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub hook_path: String,
    /// Queue workers for the job controller.
    pub workers: usize,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(SettingsError::Missing(name));

        let git_kind = match get("GIT_KIND") {
            Some(kind) => kind.parse::<GitKind>().map_err(|e| SettingsError::Invalid {
                name: "GIT_KIND",
                value: kind.clone(),
                reason: e.to_string(),
            })?,
            None => GitKind::default(),
        };

        let credentials = if let Some(dir) = get("GITHUB_APP_SECRET_DIR") {
            Credentials::AppSecretDir(PathBuf::from(dir))
        } else if let Some(token) = get("GIT_TOKEN") {
            Credentials::Token(token)
        } else if let Some(path) = get("GIT_TOKEN_PATH") {
            let path = PathBuf::from(path);
            let token = std::fs::read_to_string(&path).map_err(|source| SettingsError::File {
                name: "GIT_TOKEN_PATH",
                path: path.clone(),
                source,
            })?;
            Credentials::Token(token.trim().to_string())
        } else {
            return Err(SettingsError::Missing("GIT_TOKEN"));
        };

        let listen = get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen.parse().map_err(|e: std::net::AddrParseError| SettingsError::Invalid {
            name: "LISTEN_ADDR",
            value: listen.clone(),
            reason: e.to_string(),
        })?;

        let workers = match get("WORKERS") {
            Some(n) => n.parse::<usize>().map_err(|e| SettingsError::Invalid {
                name: "WORKERS",
                value: n.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_WORKERS,
        };

        let mut hook_path = get("HOOK_PATH").unwrap_or_else(|| DEFAULT_HOOK_PATH.to_string());
        if !hook_path.starts_with('/') {
            hook_path.insert(0, '/');
        }

        Ok(Self {
            git_server: get("GIT_SERVER").unwrap_or_else(|| DEFAULT_GIT_SERVER.to_string()),
            git_kind,
            bot_name: required("GIT_USER")?,
            credentials,
            hmac_secret: required("HMAC_TOKEN")?,
            report_url_base: get("LIGHTHOUSE_REPORT_URL_BASE"),
            service_account: get("JX_SERVICE_ACCOUNT"),
            default_image: get("JX_DEFAULT_IMAGE"),
            config_path: get("CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|| DEFAULT_CONFIG_PATH.into()),
            listen_addr,
            hook_path,
            workers: workers.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<ServerSettings, SettingsError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn minimal_environment() {
        let s = settings(&[("GIT_USER", "bot"), ("GIT_TOKEN", "t0k"), ("HMAC_TOKEN", "s3cret")]).unwrap();
        assert_eq!(s.git_server, DEFAULT_GIT_SERVER);
        assert_eq!(s.git_kind, GitKind::Github);
        assert_eq!(s.credentials, Credentials::Token("t0k".to_string()));
        assert_eq!(s.hook_path, "/hook");
        assert_eq!(s.workers, DEFAULT_WORKERS);
        assert_eq!(s.listen_addr.port(), 8080);
        assert!(s.report_url_base.is_none());
    }

    #[test]
    fn missing_values_are_named() {
        let err = settings(&[("GIT_TOKEN", "t"), ("HMAC_TOKEN", "s")]).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("GIT_USER")));
        let err = settings(&[("GIT_USER", "bot"), ("HMAC_TOKEN", "s")]).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("GIT_TOKEN")));
        let err = settings(&[("GIT_USER", "bot"), ("GIT_TOKEN", "t"), ("HMAC_TOKEN", " ")]).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("HMAC_TOKEN")));
    }

    #[test]
    fn token_file_and_app_dir() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "from-file\n").unwrap();
        let path = token.to_str().unwrap();
        let s = settings(&[("GIT_USER", "bot"), ("GIT_TOKEN_PATH", path), ("HMAC_TOKEN", "s")]).unwrap();
        assert_eq!(s.credentials, Credentials::Token("from-file".to_string()));

        let apps = dir.path().to_str().unwrap();
        let s = settings(&[
            ("GIT_USER", "bot"),
            ("GIT_KIND", "githubapp"),
            ("GITHUB_APP_SECRET_DIR", apps),
            ("HMAC_TOKEN", "s"),
            ("HOOK_PATH", "events"),
        ])
        .unwrap();
        assert_eq!(s.git_kind, GitKind::GithubApp);
        assert_eq!(s.credentials, Credentials::AppSecretDir(dir.path().to_path_buf()));
        assert_eq!(s.hook_path, "/events");
    }

    #[test]
    fn bad_values_are_rejected() {
        let base = [("GIT_USER", "bot"), ("GIT_TOKEN", "t"), ("HMAC_TOKEN", "s")];
        let with = |extra: (&'static str, &'static str)| {
            let mut vars = base.to_vec();
            vars.push(extra);
            settings(&vars)
        };
        assert!(matches!(with(("GIT_KIND", "svn")), Err(SettingsError::Invalid { name: "GIT_KIND", .. })));
        assert!(matches!(with(("WORKERS", "many")), Err(SettingsError::Invalid { name: "WORKERS", .. })));
        assert!(matches!(
            with(("LISTEN_ADDR", "nowhere")),
            Err(SettingsError::Invalid { name: "LISTEN_ADDR", .. })
        ));
    }
}
