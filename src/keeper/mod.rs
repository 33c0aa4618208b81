//! The merge-pool controller.
//!
//! Every tick the keeper searches the host for open PRs matching its
//! queries, groups them with the recorded jobs into subpools by
//! (org, repo, base branch), and takes at most one action per subpool:
//! merge a green batch, merge one green PR, start a batch run, start the
//! missing serial runs, or wait. Subpools are handled in parallel up to
//! `keeper.max_goroutines`; what each one did is kept as a [`Pool`] view and
//! appended to the [`History`] ring.

pub mod accumulate;
pub mod changes;
pub mod decide;
pub mod fanout;
pub mod history;
pub mod merge;
pub mod pool;


use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{ClusterError, LabelSelector};
use crate::config::{Config, ConfigAgent, Presubmit};
use crate::jobs::{Job, JobType, Refs};
use crate::scm::retry::retry_with_backoff;
use crate::scm::{RetryConfig, ScmError, SearchQuery};
use crate::trigger::run::{presubmit_spec, pull_for, refs_for_pull};
use crate::trigger::{Trigger, TriggerError};
use crate::types::{MergeMethod, PrNumber, PullRequest, RepoId};

use accumulate::{Accumulated, accumulate};
use changes::ChangedFiles;
use decide::{Decision, decide};
use merge::merge_prs;

pub use fanout::{ChildFactory, OwnerFanout};
pub use history::{ActionRecord, History, HistoryError, HistorySnapshot};
pub use pool::{Action, Pool, PrSummary, Subpool};

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("PR {pr} has conflicting merge method labels: {}", methods.iter().map(MergeMethod::as_str).collect::<Vec<_>>().join(", "))]
    ConflictingMergeMethod { pr: PrNumber, methods: Vec<MergeMethod> },

    #[error("subpool task failed: {0}")]
    Task(#[from] JoinError),

    #[error("subpool limiter closed: {0}")]
    Limiter(#[from] AcquireError),

    #[error("{} subpool(s) failed: {}", .0.len(), .0.join("; "))]
    Subpools(Vec<String>),

    #[error("owner fan-out failed: {0}")]
    Fanout(String),
}

/// The operations the server and the main loop need from a merge controller.
#[async_trait]
pub trait MergeController: Send + Sync {
    /// Runs one tick.
    async fn sync(&self) -> Result<(), KeeperError>;

    /// Views of every subpool from the last tick.
    fn pools(&self) -> Vec<Pool>;

    fn history(&self) -> HistorySnapshot;

    /// Persists the history ring, if it has a location.
    fn shutdown(&self) -> Result<(), KeeperError>;
}

struct Core {
    config: Arc<ConfigAgent>,
    trigger: Arc<Trigger>,
    changes: ChangedFiles,
    history: Arc<History>,
    pools: RwLock<Vec<Pool>>,
    /// Overrides the configured queries; set for per-owner children.
    queries: Option<Vec<SearchQuery>>,
}

/// Merges PRs for one host client.
pub struct Keeper {
    core: Arc<Core>,
}

impl Keeper {
    pub fn new(config: Arc<ConfigAgent>, trigger: Arc<Trigger>, history: Arc<History>) -> Self {
        Self::build(config, trigger, history, None)
    }

    /// A keeper that only searches `queries`.
    pub fn scoped(
        config: Arc<ConfigAgent>,
        trigger: Arc<Trigger>,
        history: Arc<History>,
        queries: Vec<SearchQuery>,
    ) -> Self {
        Self::build(config, trigger, history, Some(queries))
    }

    fn build(
        config: Arc<ConfigAgent>,
        trigger: Arc<Trigger>,
        history: Arc<History>,
        queries: Option<Vec<SearchQuery>>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                config,
                trigger,
                changes: ChangedFiles::new(),
                history,
                pools: RwLock::new(Vec::new()),
                queries,
            }),
        }
    }
}

impl Core {
    async fn search(&self, config: &Config) -> Result<Vec<PullRequest>, ScmError> {
        let queries = self.queries.as_ref().unwrap_or(&config.keeper.queries);
        let scm = self.trigger.scm();
        let mut found: BTreeMap<(RepoId, PrNumber), PullRequest> = BTreeMap::new();
        for query in queries {
            let prs = retry_with_backoff(RetryConfig::DEFAULT, || scm.list_open_pull_requests(query)).await?;
            debug!(query = %query.render(), count = prs.len(), "searched");
            for pr in prs {
                found.entry((pr.repo.clone(), pr.number)).or_insert(pr);
            }
        }
        Ok(found.into_values().collect())
    }

    /// Builds the filtered subpool for `repo@branch` at the current base.
    async fn subpool(
        &self,
        config: &Config,
        repo: RepoId,
        branch: String,
        prs: Vec<PullRequest>,
        jobs: Vec<Job>,
    ) -> Result<Subpool, KeeperError> {
        let scm = self.trigger.scm();
        let base_sha = retry_with_backoff(RetryConfig::DEFAULT, || scm.get_ref(&repo, &branch)).await?;
        let policy = config.keeper_context_policy(&repo, &branch);
        let configured = config.presubmits_for(&repo);
        let with_changes = pool::needs_changes(configured, &branch);

        let mut kept = Vec::new();
        let mut presubmits = BTreeMap::new();
        for pr in prs {
            let changes = if with_changes {
                match self.changes.changes(scm.as_ref(), &pr).await {
                    Ok(files) => files.to_vec(),
                    Err(e) => {
                        warn!(pr = %pr.number, error = %e, "dropping PR without a file list");
                        continue;
                    }
                }
            } else {
                Vec::new()
            };
            let required = pool::required_presubmits(configured, &branch, &changes);
            if pool::keep_pr(&pr, &policy, &required) {
                presubmits.insert(pr.number, required);
                kept.push(pr);
            }
        }

        Ok(Subpool {
            repo,
            branch,
            base_sha,
            prs: kept,
            jobs,
            policy,
            presubmits,
        })
    }

    /// Carries out `decision`, returning the action taken and any error text.
    async fn act(&self, config: &Config, sp: &Subpool, decision: &Decision) -> (Action, Option<String>) {
        match decision {
            Decision::Wait => (Action::Wait, None),
            Decision::Merge(_) | Decision::MergeBatch(_) => {
                let prs: Vec<&PullRequest> = decision.targets().into_iter().filter_map(|n| sp.pr(n)).collect();
                let outcome = merge_prs(self.trigger.scm().as_ref(), &config.keeper, &prs).await;
                let action = if outcome.aborted.is_some() || outcome.merged.is_empty() {
                    Action::MergeFailed
                } else {
                    decision.action()
                };
                (action, outcome.error_message())
            }
            Decision::TriggerBatch(numbers) => {
                let prs: Vec<&PullRequest> = numbers.iter().filter_map(|n| sp.pr(*n)).collect();
                let Some(first) = prs.first() else {
                    return (Action::Wait, None);
                };
                let refs = Refs {
                    base_sha: sp.base_sha.clone(),
                    pulls: prs.iter().map(|pr| pull_for(pr)).collect(),
                    ..refs_for_pull(first)
                };
                let mut union: BTreeMap<&str, &Presubmit> = BTreeMap::new();
                for n in numbers {
                    for p in sp.presubmits.get(n).into_iter().flatten() {
                        union.entry(p.name.as_str()).or_insert(p);
                    }
                }
                let runs: Vec<_> = union
                    .into_values()
                    .map(|p| (p, JobType::Batch, refs.clone()))
                    .collect();
                (Action::TriggerBatch, self.start_all(config, runs).await)
            }
            Decision::Trigger(missing) => {
                let mut runs = Vec::new();
                for (n, names) in missing {
                    let (Some(pr), Some(required)) = (sp.pr(*n), sp.presubmits.get(n)) else {
                        continue;
                    };
                    let refs = Refs {
                        base_sha: sp.base_sha.clone(),
                        ..refs_for_pull(pr)
                    };
                    for p in required.iter().filter(|p| names.contains(&p.name)) {
                        runs.push((p, JobType::Presubmit, refs.clone()));
                    }
                }
                (Action::Trigger, self.start_all(config, runs).await)
            }
        }
    }

    async fn start_all(&self, config: &Config, runs: Vec<(&Presubmit, JobType, Refs)>) -> Option<String> {
        let mut failures = Vec::new();
        for (p, job_type, refs) in runs {
            let spec = presubmit_spec(p, job_type, refs);
            match self
                .trigger
                .start_spec(&config.pipeline.namespace, spec, &p.labels, &p.annotations)
                .await
            {
                Ok(Some(job)) => debug!(job = %job.name(), presubmit = %p.name, "started"),
                Ok(None) => debug!(presubmit = %p.name, "already running"),
                Err(e) => {
                    warn!(presubmit = %p.name, error = %e, "failed to start");
                    failures.push(format!("{}: {e}", p.name));
                }
            }
        }
        (!failures.is_empty()).then(|| failures.join("; "))
    }

    #[instrument(skip_all, fields(pool = %format!("{repo}:{branch}")))]
    async fn sync_subpool(
        &self,
        config: &Config,
        repo: RepoId,
        branch: String,
        prs: Vec<PullRequest>,
        jobs: Vec<Job>,
    ) -> Result<Pool, KeeperError> {
        let sp = self.subpool(config, repo, branch, prs, jobs).await?;
        let acc = accumulate(&sp);
        let decision = decide(&acc, config.keeper.batch_limit(&sp.repo));
        debug!(
            success = acc.success.len(),
            pending = acc.pending.len(),
            missing = acc.missing.len(),
            action = %decision.action(),
            "decided"
        );
        let (action, error) = self.act(config, &sp, &decision).await;
        let target = summaries(&sp, decision.targets());
        if action != Action::Wait {
            info!(action = %action, targets = target.len(), error = error.as_deref().unwrap_or(""), "acted");
        }

        self.history.record(
            &sp.key(),
            ActionRecord {
                time: Utc::now(),
                action,
                base_sha: sp.base_sha.clone(),
                target: target.clone(),
                error: error.clone(),
            },
        );
        Ok(pool_view(&sp, &acc, action, target, error))
    }

    async fn sync(self: &Arc<Self>) -> Result<(), KeeperError> {
        let config = self.config.current();
        let prs = self.search(&config).await?;
        let jobs = self
            .trigger
            .jobs()
            .list(&config.pipeline.namespace, &LabelSelector::everything())
            .await?;
        let groups = pool::group_subpools(prs, &jobs);
        info!(subpools = groups.len(), jobs = jobs.len(), "syncing");

        let limiter = Arc::new(Semaphore::new(config.keeper.max_goroutines.max(1)));
        let mut tasks = JoinSet::new();
        for ((repo, branch), (prs, jobs)) in groups {
            let permit = limiter.clone().acquire_owned().await?;
            let core = self.clone();
            let config = config.clone();
            let key = pool::pool_key(&repo, &branch);
            tasks.spawn(async move {
                let result = core.sync_subpool(&config, repo, branch, prs, jobs).await;
                drop(permit);
                (key, result)
            });
        }

        let mut pools = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                (_, Ok(pool)) => pools.push(pool),
                (key, Err(e)) => {
                    error!(pool = %key, error = %e, "subpool sync failed");
                    failures.push(format!("{key}: {e}"));
                }
            }
        }
        pools.sort_by(|a, b| (&a.org, &a.repo, &a.branch).cmp(&(&b.org, &b.repo, &b.branch)));
        *self.pools.write().unwrap_or_else(|e| e.into_inner()) = pools;
        self.changes.rotate();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KeeperError::Subpools(failures))
        }
    }
}

fn summaries(sp: &Subpool, numbers: impl IntoIterator<Item = PrNumber>) -> Vec<PrSummary> {
    numbers
        .into_iter()
        .filter_map(|n| sp.pr(n))
        .map(PrSummary::from)
        .collect()
}

fn pool_view(sp: &Subpool, acc: &Accumulated, action: Action, target: Vec<PrSummary>, error: Option<String>) -> Pool {
    Pool {
        org: sp.repo.owner.clone(),
        repo: sp.repo.repo.clone(),
        branch: sp.branch.clone(),
        base_sha: sp.base_sha.clone(),
        success_prs: summaries(sp, acc.success.iter().copied()),
        pending_prs: summaries(sp, acc.pending.iter().copied()),
        missing_prs: summaries(sp, acc.missing.iter().copied()),
        batch_pending: summaries(sp, acc.batch_pending.iter().copied()),
        action,
        target,
        error,
        updated: Utc::now(),
    }
}

#[async_trait]
impl MergeController for Keeper {
    #[instrument(skip_all)]
    async fn sync(&self) -> Result<(), KeeperError> {
        self.core.sync().await
    }

    fn pools(&self) -> Vec<Pool> {
        self.core.pools.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn history(&self) -> HistorySnapshot {
        self.core.history.all()
    }

    fn shutdown(&self) -> Result<(), KeeperError> {
        self.core.history.snapshot()?;
        Ok(())
    }
}

/// Ticks `controller` until `cancel` fires, then shuts it down. The period
/// is re-read from config after every tick.
pub async fn run(controller: Arc<dyn MergeController>, config: Arc<ConfigAgent>, cancel: CancellationToken) {
    loop {
        if let Err(e) = controller.sync().await {
            error!(error = %e, "keeper sync failed");
        }
        let period = config.current().keeper.sync_period();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }
    info!("stopping keeper");
    if let Err(e) = controller.shutdown() {
        error!(error = %e, "keeper shutdown failed");
    }
}
