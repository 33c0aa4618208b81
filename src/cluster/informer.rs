//! List+watch cache with change callbacks.
//!
//! The informer subscribes to the watch stream before listing so no change
//! between the two is lost, replays the initial list as `Add` events, and then
//! forwards watch events. A `Modified` event whose resource version matches
//! the cached copy is dropped. If the watch stream lags, the informer relists
//! and emits the difference.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ClusterError, LabelSelector, Resource, ResourceClient, WatchEvent};

#[derive(Debug, Clone)]
pub enum InformerEvent<R> {
    Add(R),
    Update { old: R, new: R },
    Delete(R),
}

pub struct Informer<R: Resource> {
    client: Arc<dyn ResourceClient<R>>,
    namespace: String,
    cache: RwLock<BTreeMap<String, R>>,
    synced: AtomicBool,
}

impl<R: Resource> Informer<R> {
    pub fn new(client: Arc<dyn ResourceClient<R>>, namespace: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            namespace: namespace.into(),
            cache: RwLock::new(BTreeMap::new()),
            synced: AtomicBool::new(false),
        })
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Cached objects.
    pub fn list(&self) -> Vec<R> {
        self.read().values().cloned().collect()
    }

    /// Cached object by `namespace/name`.
    pub fn get(&self, key: &str) -> Option<R> {
        self.read().get(key).cloned()
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient<R>> {
        &self.client
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, R>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, R>> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    fn in_scope(&self, object: &R) -> bool {
        self.namespace.is_empty() || object.metadata().namespace == self.namespace
    }

    /// Folds a watch event into the cache. Returns the callback to fire, if any.
    fn apply(&self, event: WatchEvent<R>) -> Option<InformerEvent<R>> {
        if !self.in_scope(event.object()) {
            return None;
        }
        let mut cache = self.write();
        match event {
            WatchEvent::Added(new) | WatchEvent::Modified(new) => {
                let key = new.metadata().key();
                match cache.insert(key, new.clone()) {
                    Some(old) if old.metadata().resource_version == new.metadata().resource_version => None,
                    Some(old) => Some(InformerEvent::Update { old, new }),
                    None => Some(InformerEvent::Add(new)),
                }
            }
            WatchEvent::Deleted(old) => {
                cache.remove(&old.metadata().key());
                Some(InformerEvent::Delete(old))
            }
        }
    }

    /// Replaces the cache with a fresh listing and returns the differences.
    async fn relist(&self) -> Result<Vec<InformerEvent<R>>, ClusterError> {
        let listed = self
            .client
            .list(&self.namespace, &LabelSelector::everything())
            .await?;
        let mut fresh: BTreeMap<String, R> = listed
            .into_iter()
            .map(|o| (o.metadata().key(), o))
            .collect();

        let mut cache = self.write();
        let mut events = Vec::new();
        for (key, old) in cache.iter() {
            match fresh.get(key) {
                None => events.push(InformerEvent::Delete(old.clone())),
                Some(new) if new.metadata().resource_version != old.metadata().resource_version => {
                    events.push(InformerEvent::Update {
                        old: old.clone(),
                        new: new.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for (key, new) in &fresh {
            if !cache.contains_key(key) {
                events.push(InformerEvent::Add(new.clone()));
            }
        }
        std::mem::swap(&mut *cache, &mut fresh);
        Ok(events)
    }

    /// Lists, then follows the watch stream until `cancel` fires.
    pub async fn run<F>(self: Arc<Self>, handler: F, cancel: CancellationToken) -> Result<(), ClusterError>
    where
        F: Fn(InformerEvent<R>) + Send + Sync,
    {
        let mut rx = self.client.watch();
        for event in self.relist().await? {
            handler(event);
        }
        self.synced.store(true, Ordering::Release);
        debug!(kind = R::KIND, cached = self.read().len(), "informer synced");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = rx.recv() => match received {
                    Ok(event) => {
                        if let Some(event) = self.apply(event) {
                            handler(event);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(kind = R::KIND, skipped, "watch lagged, relisting");
                        for event in self.relist().await? {
                            handler(event);
                        }
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}
