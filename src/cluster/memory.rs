//! In-process object store implementing `ResourceClient`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::patch::apply_merge_patch;
use super::{ClusterError, LabelSelector, Resource, ResourceClient, WatchEvent};

const WATCH_CAPACITY: usize = 1024;

struct Inner<R> {
    objects: BTreeMap<String, R>,
    last_version: u64,
}

pub struct MemoryStore<R: Resource> {
    inner: Mutex<Inner<R>>,
    events: broadcast::Sender<WatchEvent<R>>,
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                last_version: 0,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All stored objects across namespaces.
    pub fn snapshot(&self) -> Vec<R> {
        self.lock().objects.values().cloned().collect()
    }

    fn publish(&self, event: WatchEvent<R>) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[async_trait]
impl<R: Resource> ResourceClient<R> for MemoryStore<R> {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<R>, ClusterError> {
        Ok(self
            .lock()
            .objects
            .values()
            .filter(|o| namespace.is_empty() || o.metadata().namespace == namespace)
            .filter(|o| selector.matches(&o.metadata().labels))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<R, ClusterError> {
        let key = key(namespace, name);
        self.lock()
            .objects
            .get(&key)
            .cloned()
            .ok_or(ClusterError::NotFound { kind: R::KIND, key })
    }

    async fn create(&self, mut object: R) -> Result<R, ClusterError> {
        if object.metadata().name.is_empty() {
            return Err(ClusterError::Invalid(format!("{} without a name", R::KIND)));
        }
        let stored = {
            let mut inner = self.lock();
            let key = object.metadata().key();
            if inner.objects.contains_key(&key) {
                return Err(ClusterError::AlreadyExists { kind: R::KIND, key });
            }
            inner.last_version += 1;
            object.metadata_mut().resource_version = inner.last_version;
            inner.objects.insert(key, object.clone());
            object
        };
        self.publish(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, mut object: R) -> Result<R, ClusterError> {
        let stored = {
            let mut inner = self.lock();
            let key = object.metadata().key();
            let current = inner
                .objects
                .get(&key)
                .map(|o| o.metadata().resource_version)
                .ok_or_else(|| ClusterError::NotFound {
                    kind: R::KIND,
                    key: key.clone(),
                })?;
            let given = object.metadata().resource_version;
            if given != current {
                return Err(ClusterError::Conflict {
                    kind: R::KIND,
                    key,
                    current,
                    given,
                });
            }
            inner.last_version += 1;
            object.metadata_mut().resource_version = inner.last_version;
            inner.objects.insert(key, object.clone());
            object
        };
        self.publish(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<R, ClusterError> {
        let stored = {
            let mut inner = self.lock();
            let key = key(namespace, name);
            let current = inner.objects.get(&key).ok_or_else(|| ClusterError::NotFound {
                kind: R::KIND,
                key: key.clone(),
            })?;
            let mut value = serde_json::to_value(current)?;
            apply_merge_patch(&mut value, patch);
            let mut patched: R = serde_json::from_value(value)?;
            if patched.metadata().key() != key {
                return Err(ClusterError::Invalid("patch may not rename an object".to_string()));
            }
            inner.last_version += 1;
            patched.metadata_mut().resource_version = inner.last_version;
            inner.objects.insert(key, patched.clone());
            patched
        };
        self.publish(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let key = key(namespace, name);
        let removed = self.lock().objects.remove(&key);
        match removed {
            Some(object) => {
                self.publish(WatchEvent::Deleted(object));
                Ok(())
            }
            None => Err(ClusterError::NotFound { kind: R::KIND, key }),
        }
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}
