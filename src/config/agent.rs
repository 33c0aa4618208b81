//! Publishes the current configuration and reloads it when the file changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Config, ConfigError};

pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(10);

/// Adjusts every loaded snapshot, e.g. with values from the environment.
pub type Overlay = Arc<dyn Fn(&mut Config) + Send + Sync>;

/// Identity of the file on disk; a change in either field triggers a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    async fn for_path(path: &Path) -> Option<Self> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Holds the live configuration snapshot. Readers get an `Arc<Config>` and
/// never block a reload.
pub struct ConfigAgent {
    tx: watch::Sender<Arc<Config>>,
    path: Option<PathBuf>,
    stamp: Mutex<Option<FileStamp>>,
    reload_interval: Duration,
    overlay: Option<Overlay>,
}

impl ConfigAgent {
    /// An agent serving a fixed configuration.
    pub fn from_config(config: Config) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self {
            tx,
            path: None,
            stamp: Mutex::new(None),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            overlay: None,
        }
    }

    /// Loads `path`. A config that fails to load here is fatal.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let stamp = FileStamp::for_path(&path).await;
        let config = read_config(&path).await?;
        info!(path = %path.display(), "loaded config");
        let (tx, _) = watch::channel(Arc::new(config));
        Ok(Self {
            tx,
            path: Some(path),
            stamp: Mutex::new(stamp),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            overlay: None,
        })
    }

    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Applies `overlay` to the current snapshot and every later one.
    pub fn with_overlay(mut self, overlay: impl Fn(&mut Config) + Send + Sync + 'static) -> Self {
        let overlay: Overlay = Arc::new(overlay);
        let mut config = Config::clone(&self.current());
        overlay(&mut config);
        self.tx.send_replace(Arc::new(config));
        self.overlay = Some(overlay);
        self
    }

    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    /// Publishes `config` as the new snapshot.
    pub fn set(&self, mut config: Config) {
        if let Some(overlay) = &self.overlay {
            overlay(&mut config);
        }
        self.tx.send_replace(Arc::new(config));
    }

    /// Reloads if the file changed since the last load. Returns whether a new
    /// snapshot was published. On error the previous snapshot stays.
    pub async fn reload_if_changed(&self) -> Result<bool, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let stamp = FileStamp::for_path(path).await;
        {
            let last = self.stamp.lock().unwrap_or_else(|e| e.into_inner());
            if *last == stamp {
                return Ok(false);
            }
        }
        // Record the stamp first so a broken file is reported once, not on
        // every poll.
        *self.stamp.lock().unwrap_or_else(|e| e.into_inner()) = stamp;
        let config = read_config(path).await?;
        self.set(config);
        Ok(true)
    }

    /// Polls the file until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if self.path.is_none() {
            return;
        }
        let mut ticker = tokio::time::interval(self.reload_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.reload_if_changed().await {
                Ok(true) => info!("config reloaded"),
                Ok(false) => debug!("config unchanged"),
                Err(e) => warn!(error = %e, "config reload failed, keeping previous config"),
            }
        }
    }
}

async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Config::from_yaml(&raw)
}
