//! Per-owner token lookup for GitHub App installations.
//!
//! The secrets directory holds one file per owner. Each file contains a line
//! `<server>/<owner>=<token>`. Files named `username` or starting with `.`
//! (mount metadata such as `..data`) are skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::error::ScmError;

#[derive(Debug, Clone)]
pub struct OwnerTokensDir {
    server: String,
    dir: PathBuf,
}

impl OwnerTokensDir {
    pub fn new(server: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the token for `owner`, or `None` if no file names it.
    pub fn find_token(&self, owner: &str) -> Result<Option<String>, ScmError> {
        let prefix = format!("{}/{}=", self.server, owner);
        for line in self.lines()? {
            if let Some(token) = line.strip_prefix(&prefix) {
                return Ok(Some(token.trim().to_string()));
            }
        }
        Ok(None)
    }

    /// All owners with a token for this server, sorted.
    pub fn owners(&self) -> Result<Vec<String>, ScmError> {
        let prefix = format!("{}/", self.server);
        let mut owners = BTreeSet::new();
        for line in self.lines()? {
            let Some(rest) = line.strip_prefix(&prefix) else {
                continue;
            };
            if let Some((owner, _)) = rest.split_once('=') {
                if !owner.is_empty() && !owner.contains('/') {
                    owners.insert(owner.to_string());
                }
            }
        }
        Ok(owners.into_iter().collect())
    }

    fn lines(&self) -> Result<Vec<String>, ScmError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ScmError::permanent(format!("reading tokens dir {}: {e}", self.dir.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n != "username" && !n.starts_with('.'))
            })
            .collect();
        paths.sort();

        let mut out = Vec::new();
        for path in paths {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    for line in content.lines() {
                        let line = line.trim();
                        if !line.is_empty() {
                            out.push(line.to_string());
                        }
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable token file"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn finds_token_by_owner_prefix() {
        let dir = tempdir().unwrap();
        write(dir.path(), "acme", "https://github.com/acme=tok-acme\n");
        write(dir.path(), "widgets", "https://github.com/widgets=tok-w");
        let tokens = OwnerTokensDir::new("https://github.com/", dir.path());

        assert_eq!(tokens.find_token("acme").unwrap().as_deref(), Some("tok-acme"));
        assert_eq!(tokens.find_token("widgets").unwrap().as_deref(), Some("tok-w"));
        assert_eq!(tokens.find_token("other").unwrap(), None);
    }

    #[test]
    fn ignores_username_and_dot_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "username", "https://github.com/bot=nope");
        write(dir.path(), "..data", "https://github.com/hidden=nope");
        write(dir.path(), "acme", "https://github.com/acme=tok");
        let tokens = OwnerTokensDir::new("https://github.com", dir.path());

        assert_eq!(tokens.owners().unwrap(), vec!["acme".to_string()]);
        assert_eq!(tokens.find_token("bot").unwrap(), None);
    }

    #[test]
    fn other_servers_are_ignored() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a", "https://ghe.example.com/acme=tok");
        let tokens = OwnerTokensDir::new("https://github.com", dir.path());
        assert!(tokens.owners().unwrap().is_empty());
    }

    #[test]
    fn missing_dir_is_an_error() {
        let tokens = OwnerTokensDir::new("https://github.com", "/nonexistent/tokens");
        assert!(tokens.owners().is_err());
    }
}
