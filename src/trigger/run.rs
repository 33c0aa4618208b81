use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::filter::{Filter, Partition, filter_presubmits};
use super::{Trigger, TriggerError};
use crate::cluster::{ClusterError, LabelSelector};
use crate::config::{Config, Postsubmit, Presubmit};
use crate::jobs::labels::{BUILD_NUM_LABEL, ORG_LABEL, PULL_LABEL, REPO_LABEL, trim_label};
use crate::jobs::{Job, JobSpec, JobState, JobType, Pull, Refs, new_job};
use crate::types::{PrNumber, PullRequest, RepoId, Sha, StatusInput, StatusState};

pub const SKIPPED_DESCRIPTION: &str = "Skipped.";
pub const TRIGGERED_DESCRIPTION: &str = "Job triggered.";

pub(crate) fn refs_for_pull(pr: &PullRequest) -> Refs {
    Refs {
        org: pr.repo.owner.clone(),
        repo: pr.repo.repo.clone(),
        base_ref: pr.base_ref.clone(),
        base_sha: pr.base_sha.clone(),
        base_link: String::new(),
        clone_uri: String::new(),
        pulls: vec![pull_for(pr)],
    }
}

pub(crate) fn pull_for(pr: &PullRequest) -> Pull {
    Pull {
        number: pr.number,
        author: pr.author.clone(),
        sha: pr.head_sha.clone(),
        title: pr.title.clone(),
        ref_name: pr.head_ref.clone(),
        link: pr.link.clone(),
    }
}

/// Sorted `(number, head)` pairs of the pulls under test.
fn pull_heads(refs: &Refs) -> Vec<(PrNumber, &Sha)> {
    let mut heads: Vec<_> = refs.pulls.iter().map(|p| (p.number, &p.sha)).collect();
    heads.sort();
    heads
}

/// True if both jobs test the same code: the same head for a single ref,
/// the same base and pull heads for a batch.
fn same_revision(a: &Job, b: &Job) -> bool {
    match (a.spec.refs.as_ref(), b.spec.refs.as_ref()) {
        (Some(x), Some(y)) if x.pulls.len() > 1 || y.pulls.len() > 1 => {
            x.base_sha == y.base_sha && pull_heads(x) == pull_heads(y)
        }
        _ => a.report_sha() == b.report_sha(),
    }
}

pub(crate) fn presubmit_spec(p: &Presubmit, job_type: JobType, refs: Refs) -> JobSpec {
    JobSpec {
        job_type,
        job: p.name.clone(),
        context: p.context.clone(),
        refs: Some(refs),
        rerun_command: p.rerun_command.clone(),
        skip_report: p.skip_report,
        max_concurrency: p.max_concurrency,
        decorate: false,
    }
}

fn postsubmit_spec(p: &Postsubmit, refs: Refs) -> JobSpec {
    JobSpec {
        job_type: JobType::Postsubmit,
        job: p.name.clone(),
        context: p.context.clone(),
        refs: Some(refs),
        rerun_command: String::new(),
        skip_report: p.skip_report,
        max_concurrency: p.max_concurrency,
        decorate: false,
    }
}

/// Contexts present in both halves of `partition`.
pub fn overlapping_contexts(partition: &Partition) -> Vec<String> {
    let run: BTreeSet<&str> = partition.to_run.iter().map(|p| p.context.as_str()).collect();
    let skip: BTreeSet<&str> = partition.to_skip.iter().map(|p| p.context.as_str()).collect();
    run.intersection(&skip).map(|c| c.to_string()).collect()
}

impl Trigger {
    /// Applies `filter` to the repo's presubmits for `pr` and acts on the
    /// result.
    pub(crate) async fn filter_and_run(
        &self,
        config: &Config,
        pr: &PullRequest,
        filter: &Filter,
    ) -> Result<Vec<Job>, TriggerError> {
        let presubmits = config.presubmits_for(&pr.repo);
        if presubmits.is_empty() {
            debug!(repo = %pr.repo, "no presubmits configured");
            return Ok(Vec::new());
        }
        let changes = if filter.needs_changes(presubmits) {
            self.changes
                .changes(self.scm.as_ref(), &pr.repo, pr.number, &pr.head_sha)
                .await?
                .to_vec()
        } else {
            Vec::new()
        };
        let partition = filter_presubmits(filter, presubmits, &pr.base_ref, &changes);
        self.run_and_skip(config, pr, &partition).await
    }

    /// Starts every job in `to_run` and marks every reporting job in
    /// `to_skip` as skipped. Refuses to do either if some context is in
    /// both. Per-job launch failures are reported as an `error` status on
    /// the PR and returned together after the rest have been started.
    #[instrument(skip_all, fields(repo = %pr.repo, pr = %pr.number, sha = %pr.head_sha.short()))]
    pub async fn run_and_skip(
        &self,
        config: &Config,
        pr: &PullRequest,
        partition: &Partition,
    ) -> Result<Vec<Job>, TriggerError> {
        let overlap = overlapping_contexts(partition);
        if !overlap.is_empty() {
            return Err(TriggerError::RunSkipOverlap(overlap));
        }
        let namespace = &config.pipeline.namespace;

        let mut started = Vec::new();
        let mut failures = Vec::new();
        for p in &partition.to_run {
            let spec = presubmit_spec(p, JobType::Presubmit, refs_for_pull(pr));
            match self.start_spec(namespace, spec, &p.labels, &p.annotations).await {
                Ok(Some(job)) => started.push(job),
                Ok(None) => {}
                Err(e) => {
                    warn!(job = %p.name, error = %e, "failed to start presubmit");
                    let status = StatusInput {
                        state: StatusState::Error,
                        label: p.context.clone(),
                        description: format!("Error creating metapipeline: {e}"),
                        target_url: String::new(),
                    };
                    if let Err(e) = self.scm.create_status(&pr.repo, &pr.head_sha, &status).await {
                        warn!(context = %p.context, error = %e, "failed to report launch error");
                    }
                    failures.push(format!("{}: {e}", p.name));
                }
            }
        }

        let elide = config.trigger_for(&pr.repo).elide_skipped_contexts;
        for p in partition.to_skip.iter().filter(|p| p.reports()) {
            if elide {
                debug!(context = %p.context, "eliding skipped context");
                continue;
            }
            let status = StatusInput {
                state: StatusState::Success,
                label: p.context.clone(),
                description: SKIPPED_DESCRIPTION.to_string(),
                target_url: String::new(),
            };
            self.scm.create_status(&pr.repo, &pr.head_sha, &status).await?;
        }

        if failures.is_empty() {
            Ok(started)
        } else {
            Err(TriggerError::Launch(failures))
        }
    }

    /// Starts every postsubmit of `repo` that applies to a push of `sha`
    /// to `branch`.
    pub(crate) async fn run_postsubmits(
        &self,
        config: &Config,
        repo: &RepoId,
        branch: &str,
        sha: &Sha,
        changes: &[String],
    ) -> Result<Vec<Job>, TriggerError> {
        let namespace = &config.pipeline.namespace;
        let mut started = Vec::new();
        let mut failures = Vec::new();
        for p in config.postsubmits_for(repo) {
            if !p.should_run(branch, changes) {
                continue;
            }
            let refs = Refs {
                org: repo.owner.clone(),
                repo: repo.repo.clone(),
                base_ref: branch.to_string(),
                base_sha: sha.clone(),
                base_link: String::new(),
                clone_uri: String::new(),
                pulls: Vec::new(),
            };
            let spec = postsubmit_spec(p, refs);
            match self.start_spec(namespace, spec, &p.labels, &p.annotations).await {
                Ok(Some(job)) => started.push(job),
                Ok(None) => {}
                Err(e) => {
                    warn!(job = %p.name, error = %e, "failed to start postsubmit");
                    failures.push(format!("{}: {e}", p.name));
                }
            }
        }
        if failures.is_empty() {
            Ok(started)
        } else {
            Err(TriggerError::Launch(failures))
        }
    }

    /// Launches a pipeline for `spec` and records the job. Returns `None`
    /// when an active job for the same context already runs at the same
    /// SHA. Active presubmits for the same PR and context at an older SHA
    /// are aborted first.
    pub(crate) async fn start_spec(
        &self,
        namespace: &str,
        spec: JobSpec,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<Job>, TriggerError> {
        let mut job = new_job(namespace, spec, labels, annotations);
        if self.supersede(namespace, &job).await? {
            debug!(job = %job.spec.job, "already running at this sha");
            return Ok(None);
        }

        let launched = self.launcher.launch(&job).await?;
        job.status.activity_name = launched.activity_name;
        job.status.build_id = launched.build_number.to_string();
        job.metadata
            .labels
            .insert(BUILD_NUM_LABEL.to_string(), launched.build_number.to_string());
        job.status.description = TRIGGERED_DESCRIPTION.to_string();
        let job = self.jobs.create(job).await?;
        info!(
            job = %job.spec.job,
            name = %job.name(),
            activity = %job.status.activity_name,
            "started job"
        );
        Ok(Some(job))
    }

    /// Aborts active jobs that `candidate` replaces. Returns true if an
    /// equivalent job is already active.
    async fn supersede(&self, namespace: &str, candidate: &Job) -> Result<bool, ClusterError> {
        let Some(refs) = candidate.spec.refs.as_ref() else {
            return Ok(false);
        };
        let mut selector = LabelSelector::everything()
            .with(ORG_LABEL, trim_label(&refs.org))
            .with(REPO_LABEL, trim_label(&refs.repo));
        if let Some(n) = candidate.pull_number() {
            selector = selector.with(PULL_LABEL, n.0.to_string());
        }
        let existing = self.jobs.list(namespace, &selector).await?;
        let same_lane = |j: &Job| {
            j.is_active()
                && j.spec.context == candidate.spec.context
                && j.spec.job_type == candidate.spec.job_type
                && j.pull_number() == candidate.pull_number()
                && j.spec.refs.as_ref().map(|r| &r.base_ref) == Some(&refs.base_ref)
        };

        if existing.iter().any(|j| same_lane(j) && same_revision(j, candidate)) {
            return Ok(true);
        }
        if !matches!(candidate.spec.job_type, JobType::Presubmit | JobType::Batch) {
            return Ok(false);
        }
        for mut old in existing.into_iter().filter(|j| same_lane(j)) {
            debug!(job = %old.name(), sha = ?old.head_sha(), "aborting superseded job");
            old.status.state = JobState::Aborted;
            old.status.completion_time = Some(Utc::now());
            old.status.description = match old.spec.job_type {
                JobType::Batch => "Aborted by a newer batch.".to_string(),
                _ => "Aborted by a newer commit.".to_string(),
            };
            old.status.last_reported_state = Some(JobState::Aborted);
            self.jobs.update(old).await?;
        }
        Ok(false)
    }
}
