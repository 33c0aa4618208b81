//! One keeper per GitHub App installation owner.
//!
//! With per-owner tokens, each owner found in the secrets directory gets its
//! own child controller searching only that owner's share of the queries.
//! Children are rebuilt at the start of every tick so owners can come and go
//! without a restart. All children record into one shared history.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::{HistorySnapshot, History, KeeperError, MergeController, Pool};
use crate::config::ConfigAgent;
use crate::scm::{OwnerTokensDir, SearchQuery};

/// Builds a child for `owner` from its token and scoped queries.
pub type ChildFactory =
    Arc<dyn Fn(&str, String, Vec<SearchQuery>) -> Result<Arc<dyn MergeController>, KeeperError> + Send + Sync>;

pub struct OwnerFanout {
    config: Arc<ConfigAgent>,
    tokens: OwnerTokensDir,
    factory: ChildFactory,
    history: Arc<History>,
    children: RwLock<Vec<(String, Arc<dyn MergeController>)>>,
}

impl OwnerFanout {
    pub fn new(config: Arc<ConfigAgent>, tokens: OwnerTokensDir, history: Arc<History>, factory: ChildFactory) -> Self {
        Self {
            config,
            tokens,
            factory,
            history,
            children: RwLock::new(Vec::new()),
        }
    }

    fn rebuild(&self) -> Result<Vec<(String, Arc<dyn MergeController>)>, KeeperError> {
        let config = self.config.current();
        let mut children = Vec::new();
        for owner in self.tokens.owners()? {
            let queries: Vec<SearchQuery> = config
                .keeper
                .queries
                .iter()
                .filter_map(|q| q.for_owner(&owner))
                .collect();
            if queries.is_empty() {
                debug!(owner = %owner, "no queries for owner");
                continue;
            }
            let Some(token) = self.tokens.find_token(&owner)? else {
                warn!(owner = %owner, "owner listed without a token");
                continue;
            };
            children.push((owner.clone(), (self.factory)(&owner, token, queries)?));
        }
        Ok(children)
    }

    fn children(&self) -> Vec<(String, Arc<dyn MergeController>)> {
        self.children.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MergeController for OwnerFanout {
    #[instrument(skip_all)]
    async fn sync(&self) -> Result<(), KeeperError> {
        let children = self.rebuild()?;
        info!(owners = children.len(), "rebuilt owner keepers");
        *self.children.write().unwrap_or_else(|e| e.into_inner()) = children.clone();

        let mut tasks = JoinSet::new();
        for (owner, child) in children {
            tasks.spawn(async move { (owner, child.sync().await) });
        }
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let (owner, Err(e)) = joined? {
                warn!(owner = %owner, error = %e, "owner sync failed");
                failures.push(format!("{owner}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(KeeperError::Fanout(failures.join("; ")))
        }
    }

    fn pools(&self) -> Vec<Pool> {
        self.children()
            .iter()
            .flat_map(|(_, child)| child.pools())
            .collect()
    }

    fn history(&self) -> HistorySnapshot {
        self.history.all()
    }

    fn shutdown(&self) -> Result<(), KeeperError> {
        self.children.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.history.snapshot()?;
        Ok(())
    }
}
