//! Mirrors job state onto commit statuses.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::ControllerError;
use super::template::target_url;
use crate::cluster::ResourceClient;
use crate::config::Config;
use crate::jobs::{Job, JobState};
use crate::scm::SharedScmClient;
use crate::types::{StatusInput, StatusState};

pub fn scm_state(state: JobState) -> StatusState {
    match state {
        JobState::Triggered | JobState::Pending | JobState::Running => StatusState::Pending,
        JobState::Success => StatusState::Success,
        JobState::Failure | JobState::Aborted => StatusState::Failure,
        JobState::Error => StatusState::Error,
    }
}

fn default_description(state: JobState) -> &'static str {
    match state {
        JobState::Triggered => "Job triggered.",
        JobState::Pending => "Job pending.",
        JobState::Running => "Job running.",
        JobState::Success => "Job succeeded.",
        JobState::Failure => "Job failed.",
        JobState::Aborted => "Job aborted.",
        JobState::Error => "Job errored.",
    }
}

/// True once a report of `state` can never be followed by another.
fn is_final_report(state: JobState) -> bool {
    matches!(state, JobState::Success | JobState::Aborted | JobState::Failure)
}

pub struct StatusReporter {
    scm: SharedScmClient,
    jobs: Arc<dyn ResourceClient<Job>>,
}

impl StatusReporter {
    pub fn new(scm: SharedScmClient, jobs: Arc<dyn ResourceClient<Job>>) -> Self {
        Self { scm, jobs }
    }

    /// Posts `job`'s state as a commit status unless that exact state was
    /// already reported. Returns the job with its report bookkeeping updated,
    /// or `None` if nothing was posted.
    #[instrument(skip_all, fields(job = %job.name(), state = %job.status.state))]
    pub async fn report(&self, config: &Config, job: &Job) -> Result<Option<Job>, ControllerError> {
        if job.spec.skip_report {
            return Ok(None);
        }
        let (Some(repo), Some(sha)) = (job.repo_id(), job.report_sha()) else {
            debug!("job has no single sha to report against");
            return Ok(None);
        };
        let state = job.status.state;
        let description = if job.status.description.is_empty() {
            default_description(state).to_string()
        } else {
            job.status.description.clone()
        };
        if let Some(last) = job.status.last_reported_state {
            if is_final_report(last) {
                debug!(last = %last, "final state already reported");
                return Ok(None);
            }
            if last == state && job.status.last_reported_description == description {
                return Ok(None);
            }
        }

        let url = match target_url(&config.pipeline, job) {
            Ok(url) => url.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "invalid report URL template");
                String::new()
            }
        };
        let status = StatusInput {
            state: scm_state(state),
            label: job.spec.context.clone(),
            description: description.clone(),
            target_url: url,
        };
        self.scm.create_status(&repo, sha, &status).await?;
        info!(repo = %repo, sha = %sha.short(), context = %job.spec.context, "reported status");

        let mut updated = job.clone();
        updated.status.last_reported_state = Some(state);
        updated.status.last_reported_description = description;
        Ok(Some(self.jobs.update(updated).await?))
    }
}
