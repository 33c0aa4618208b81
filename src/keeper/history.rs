//! Per-subpool ring of recent keeper actions.
//!
//! The ring can be seeded from, and snapshotted to, a JSON document
//! `{poolKey: [record...]}` at a local path. Snapshots are written to a
//! temporary sibling, fsynced, renamed over the target, and the directory is
//! fsynced, so readers see either the old or the new document.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::pool::{Action, PrSummary};
use crate::types::Sha;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported history location {0:?}; only local paths are supported")]
    UnsupportedUri(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub time: DateTime<Utc>,
    pub action: Action,
    pub base_sha: Sha,
    #[serde(default)]
    pub target: Vec<PrSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

pub type HistorySnapshot = BTreeMap<String, Vec<ActionRecord>>;

/// Resolves `uri` to a local path. `file://` prefixes are stripped; other
/// schemes are rejected.
fn local_path(uri: &str) -> Result<PathBuf, HistoryError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if uri.contains("://") {
        return Err(HistoryError::UnsupportedUri(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}

pub struct History {
    capacity: usize,
    path: Option<PathBuf>,
    pools: RwLock<BTreeMap<String, VecDeque<ActionRecord>>>,
}

impl History {
    /// A ring of `capacity` records per pool, seeded from `uri` if it names
    /// an existing document.
    pub fn new(capacity: usize, uri: Option<&str>) -> Result<Self, HistoryError> {
        let path = uri.filter(|u| !u.is_empty()).map(local_path).transpose()?;
        let history = Self {
            capacity: capacity.max(1),
            path,
            pools: RwLock::new(BTreeMap::new()),
        };
        if let Some(path) = &history.path {
            match std::fs::read(path) {
                Ok(bytes) => {
                    let seed: HistorySnapshot = serde_json::from_slice(&bytes)?;
                    info!(path = %path.display(), pools = seed.len(), "seeded history");
                    history.merge(seed);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no history to seed from");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(history)
    }

    pub fn record(&self, pool: &str, record: ActionRecord) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        let ring = pools.entry(pool.to_string()).or_default();
        ring.push_back(record);
        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    /// Records per pool, oldest first.
    pub fn all(&self) -> HistorySnapshot {
        self.pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect()
    }

    /// Interleaves `other` by time, keeping the newest `capacity` per pool.
    pub fn merge(&self, other: HistorySnapshot) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        for (pool, records) in other {
            let ring = pools.entry(pool).or_default();
            let mut merged: Vec<ActionRecord> = ring.drain(..).chain(records).collect();
            merged.sort_by_key(|r| r.time);
            let skip = merged.len().saturating_sub(self.capacity);
            ring.extend(merged.into_iter().skip(skip));
        }
    }

    /// Writes the ring to its location, if it has one.
    pub fn snapshot(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, &serde_json::to_vec_pretty(&self.all())?)?;
        info!(path = %path.display(), "wrote history snapshot");
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn record(action: Action, minutes_ago: i64) -> ActionRecord {
        ActionRecord {
            time: Utc::now() - Duration::minutes(minutes_ago),
            action,
            base_sha: Sha::new("base"),
            target: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn ring_keeps_newest() {
        let history = History::new(2, None).unwrap();
        for (i, action) in [Action::Wait, Action::Trigger, Action::Merge].into_iter().enumerate() {
            history.record("org/repo:master", record(action, 10 - i as i64));
        }
        let all = history.all();
        let actions: Vec<Action> = all["org/repo:master"].iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![Action::Trigger, Action::Merge]);
    }

    #[test]
    fn merge_interleaves_by_time() {
        let history = History::new(10, None).unwrap();
        history.record("p", record(Action::Wait, 5));
        history.record("p", record(Action::Merge, 1));
        history.merge(BTreeMap::from([("p".to_string(), vec![record(Action::Trigger, 3)])]));
        let actions: Vec<Action> = history.all()["p"].iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![Action::Wait, Action::Trigger, Action::Merge]);
    }

    #[test]
    fn snapshot_then_seed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history").join("keeper.json");
        let uri = format!("file://{}", path.display());

        let history = History::new(5, Some(&uri)).unwrap();
        history.record("org/repo:master", record(Action::MergeBatch, 1));
        history.snapshot().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = History::new(5, Some(path.to_str().unwrap())).unwrap();
        assert_eq!(reloaded.all(), history.all());
    }

    #[test]
    fn remote_locations_are_rejected() {
        assert!(matches!(
            History::new(5, Some("gs://bucket/history.json")),
            Err(HistoryError::UnsupportedUri(_))
        ));
    }
}
