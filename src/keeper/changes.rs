//! Changed files per PR head, kept for one tick past their last use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::scm::{ScmClient, ScmError};
use crate::types::{PrNumber, PullRequest, RepoId, Sha};

type Key = (RepoId, PrNumber, Sha);

#[derive(Debug, Default)]
struct Generations {
    current: HashMap<Key, Arc<Vec<String>>>,
    previous: HashMap<Key, Arc<Vec<String>>>,
}

/// Two-generation cache: hits from the previous tick are promoted, and
/// `rotate` at tick end drops whatever was not used during the tick.
#[derive(Debug, Default)]
pub struct ChangedFiles {
    generations: RwLock<Generations>,
}

impl ChangedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn changes(&self, scm: &dyn ScmClient, pr: &PullRequest) -> Result<Arc<Vec<String>>, ScmError> {
        let key = (pr.repo.clone(), pr.number, pr.head_sha.clone());
        {
            let generations = self.generations.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = generations.current.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }
        {
            let mut generations = self.generations.write().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = generations.previous.remove(&key) {
                generations.current.insert(key, Arc::clone(&hit));
                return Ok(hit);
            }
        }
        let files = Arc::new(scm.get_pull_request_changes(&pr.repo, pr.number).await?);
        self.generations
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .insert(key, Arc::clone(&files));
        Ok(files)
    }

    pub fn rotate(&self) {
        let mut generations = self.generations.write().unwrap_or_else(|e| e.into_inner());
        generations.previous = std::mem::take(&mut generations.current);
    }

    pub fn len(&self) -> usize {
        let generations = self.generations.read().unwrap_or_else(|e| e.into_inner());
        generations.current.len() + generations.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::fake::FakeScmClient;
    use crate::types::pr::test_pr;

    #[tokio::test]
    async fn entries_survive_one_idle_tick() {
        let scm = FakeScmClient::new("bot");
        let pr = test_pr(1, "a");
        scm.set_changes(&pr.repo, pr.number, &["src/lib.rs"]);
        let cache = ChangedFiles::new();

        assert_eq!(*cache.changes(&scm, &pr).await.unwrap(), vec!["src/lib.rs"]);
        cache.changes(&scm, &pr).await.unwrap();
        assert_eq!(scm.state().change_requests, 1);

        cache.rotate();
        cache.changes(&scm, &pr).await.unwrap();
        assert_eq!(scm.state().change_requests, 1);

        cache.rotate();
        cache.rotate();
        assert!(cache.is_empty());
        cache.changes(&scm, &pr).await.unwrap();
        assert_eq!(scm.state().change_requests, 2);
    }

    #[tokio::test]
    async fn new_heads_miss() {
        let scm = FakeScmClient::new("bot");
        let cache = ChangedFiles::new();
        cache.changes(&scm, &test_pr(1, "a")).await.unwrap();
        cache.changes(&scm, &test_pr(1, "b")).await.unwrap();
        assert_eq!(scm.state().change_requests, 2);
        assert_eq!(cache.len(), 2);
    }
}
