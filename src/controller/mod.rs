//! The job controller.
//!
//! Informers on jobs and activities feed one work queue through its rate
//! limiter. Activity keys are folded into their job's status; job keys are
//! mirrored onto commit statuses. A failed key is retried with backoff until
//! `MAX_RETRIES`.

pub mod activity;
pub mod reporter;
pub mod template;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterError, Informer, InformerEvent, ResourceClient};
use crate::config::ConfigAgent;
use crate::jobs::{Activity, Job};
use crate::queue::WorkQueue;
use crate::scm::{ScmError, SharedScmClient};

pub use activity::ActivityReconciler;
pub use reporter::{StatusReporter, scm_state};

pub const MAX_RETRIES: u32 = 10;

const SYNC_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("malformed queue key {0:?}")]
    BadKey(String),
}

/// A work-queue entry: `job:::ns/name` or `activity:::ns/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueKey {
    Job(String),
    Activity(String),
}

const JOB_PREFIX: &str = "job:::";
const ACTIVITY_PREFIX: &str = "activity:::";

impl QueueKey {
    pub fn parse(key: &str) -> Option<Self> {
        let (make, rest): (fn(String) -> Self, &str) = if let Some(rest) = key.strip_prefix(JOB_PREFIX) {
            (QueueKey::Job, rest)
        } else if let Some(rest) = key.strip_prefix(ACTIVITY_PREFIX) {
            (QueueKey::Activity, rest)
        } else {
            return None;
        };
        let (ns, name) = rest.split_once('/')?;
        if ns.is_empty() || name.is_empty() {
            return None;
        }
        Some(make(rest.to_string()))
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKey::Job(k) => write!(f, "{JOB_PREFIX}{k}"),
            QueueKey::Activity(k) => write!(f, "{ACTIVITY_PREFIX}{k}"),
        }
    }
}

pub struct Controller {
    config: Arc<ConfigAgent>,
    jobs: Arc<Informer<Job>>,
    activities: Arc<Informer<Activity>>,
    queue: Arc<WorkQueue>,
    reconciler: ActivityReconciler,
    reporter: StatusReporter,
}

impl Controller {
    pub fn new(
        config: Arc<ConfigAgent>,
        scm: SharedScmClient,
        jobs: Arc<dyn ResourceClient<Job>>,
        activities: Arc<dyn ResourceClient<Activity>>,
        namespace: &str,
    ) -> Arc<Self> {
        Self::with_queue(config, scm, jobs, activities, namespace, WorkQueue::default())
    }

    /// Like [`Controller::new`], feeding `queue` instead of a default one.
    pub fn with_queue(
        config: Arc<ConfigAgent>,
        scm: SharedScmClient,
        jobs: Arc<dyn ResourceClient<Job>>,
        activities: Arc<dyn ResourceClient<Activity>>,
        namespace: &str,
        queue: WorkQueue,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            jobs: Informer::new(jobs.clone(), namespace),
            activities: Informer::new(activities, namespace),
            queue: Arc::new(queue),
            reconciler: ActivityReconciler::new(jobs.clone()),
            reporter: StatusReporter::new(scm, jobs),
        })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn has_synced(&self) -> bool {
        self.jobs.has_synced() && self.activities.has_synced()
    }

    /// Handles one key against the informer caches.
    pub async fn process(&self, key: &str) -> Result<(), ControllerError> {
        match QueueKey::parse(key).ok_or_else(|| ControllerError::BadKey(key.to_string()))? {
            QueueKey::Job(k) => {
                let Some(job) = self.jobs.get(&k) else {
                    debug!(key = %k, "job is gone");
                    return Ok(());
                };
                let config = self.config.current();
                self.reporter.report(&config, &job).await?;
            }
            QueueKey::Activity(k) => {
                let Some(activity) = self.activities.get(&k) else {
                    debug!(key = %k, "activity is gone");
                    return Ok(());
                };
                self.reconciler.reconcile(&activity).await?;
            }
        }
        Ok(())
    }

    async fn process_next(&self, key: String) {
        match self.process(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(ControllerError::BadKey(_)) => {
                error!(key = %key, "dropping malformed key");
                self.queue.forget(&key);
            }
            Err(e) => {
                let requeues = self.queue.num_requeues(&key);
                if requeues < MAX_RETRIES {
                    warn!(key = %key, requeues, error = %e, "retrying key");
                    self.queue.add_rate_limited(key.clone());
                } else {
                    error!(key = %key, error = %e, "giving up on key");
                    self.queue.forget(&key);
                }
            }
        }
        self.queue.done(&key);
    }

    fn spawn_informers(self: &Arc<Self>, tasks: &mut JoinSet<()>, cancel: &CancellationToken) {
        let queue = self.queue.clone();
        let informer = self.jobs.clone();
        let token = cancel.clone();
        tasks.spawn(async move {
            let handler = move |event: InformerEvent<Job>| match event {
                InformerEvent::Add(job) => queue.add_rate_limited(QueueKey::Job(job.metadata.key()).to_string()),
                InformerEvent::Update { old, new } if old.status != new.status => {
                    queue.add_rate_limited(QueueKey::Job(new.metadata.key()).to_string())
                }
                _ => {}
            };
            if let Err(e) = informer.run(handler, token).await {
                error!(error = %e, "job informer stopped");
            }
        });

        let queue = self.queue.clone();
        let informer = self.activities.clone();
        let token = cancel.clone();
        tasks.spawn(async move {
            let handler = move |event: InformerEvent<Activity>| match event {
                InformerEvent::Add(a) | InformerEvent::Update { new: a, .. } => {
                    queue.add_rate_limited(QueueKey::Activity(a.metadata.key()).to_string())
                }
                InformerEvent::Delete(_) => {}
            };
            if let Err(e) = informer.run(handler, token).await {
                error!(error = %e, "activity informer stopped");
            }
        });
    }

    /// Runs informers and `workers` queue workers until `cancel` fires.
    pub async fn run(self: Arc<Self>, workers: usize, cancel: CancellationToken) {
        let mut informers = JoinSet::new();
        self.spawn_informers(&mut informers, &cancel);

        while !self.has_synced() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    informers.join_all().await;
                    return;
                }
                _ = tokio::time::sleep(SYNC_POLL) => {}
            }
        }
        info!(workers, "controller caches synced");

        let mut pool = JoinSet::new();
        for _ in 0..workers.max(1) {
            let this = self.clone();
            pool.spawn(async move {
                while let Some(key) = this.queue.get().await {
                    this.process_next(key).await;
                }
            });
        }

        cancel.cancelled().await;
        info!("stopping controller");
        self.queue.shut_down();
        pool.join_all().await;
        informers.join_all().await;
    }
}

#[cfg(test)]
mod tests;
