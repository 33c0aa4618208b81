//! Cluster API seam.
//!
//! Jobs, activities and pipeline runs live in the cluster API. Controllers see
//! them through `ResourceClient<R>`: list by label selector, optimistic
//! updates keyed on `resource_version`, JSON merge patches, and a watch stream.
//! `MemoryStore` is the in-process implementation; `Informer` keeps a synced
//! cache on top of any client.

pub mod informer;
pub mod memory;
pub mod patch;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use informer::{Informer, InformerEvent};
pub use memory::MemoryStore;

/// Identity and bookkeeping shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Bumped by the store on every write. Zero means "never stored".
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A kind of object stored in the cluster.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Lower-case kind name, used as the work-queue key prefix.
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("conflict updating {kind} {key}: have version {current}, got {given}")]
    Conflict {
        kind: &'static str,
        key: String,
        current: u64,
        given: u64,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Equality-based label selector: every pair must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(","))
    }
}

/// A change observed on the watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

impl<R: Resource> WatchEvent<R> {
    pub fn object(&self) -> &R {
        match self {
            WatchEvent::Added(r) | WatchEvent::Modified(r) | WatchEvent::Deleted(r) => r,
        }
    }
}

#[async_trait]
pub trait ResourceClient<R: Resource>: Send + Sync {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<R>, ClusterError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<R, ClusterError>;

    /// Stores a new object. Fails if the name is taken.
    async fn create(&self, object: R) -> Result<R, ClusterError>;

    /// Replaces an object. `resource_version` must equal the stored one.
    async fn update(&self, object: R) -> Result<R, ClusterError>;

    /// Applies an RFC 7386 merge patch.
    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<R, ClusterError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Subscribes to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}
