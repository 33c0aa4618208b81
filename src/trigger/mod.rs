//! The trigger reconciler.
//!
//! Turns pull request, push and comment events into job records. Every
//! handler reads the config snapshot it is given, decides which jobs the
//! event asks for, and creates them through the pipeline launcher. Creating
//! a job that already runs at the same SHA is a no-op, so replaying an event
//! is harmless.

pub mod filter;
mod generic_comment;
mod pull_request;
mod push;
pub(crate) mod run;
pub mod trust;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use thiserror::Error;

use crate::cluster::{ClusterError, ResourceClient};
use crate::jobs::{Job, LaunchError, PipelineLauncher};
use crate::scm::{ScmError, SharedScmClient};

pub use filter::{ChangeCache, Filter, FilterDecision, Partition, filter_presubmits};
pub use generic_comment::{UNTRUSTED_PR_MESSAGE, untrusted_pr_comment};
pub use pull_request::welcome_message;
pub use trust::{
    LGTM_LABEL, NEEDS_OK_TO_TEST_LABEL, OK_TO_TEST_LABEL, UPDATEBOT_LABEL, trusted_pull_request,
    trusted_user,
};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Pipeline(#[from] LaunchError),

    /// A context was selected both to run and to skip.
    #[error("contexts selected to both run and skip: {}", .0.join(", "))]
    RunSkipOverlap(Vec<String>),

    #[error("failed to start {} job(s): {}", .0.len(), .0.join("; "))]
    Launch(Vec<String>),
}

/// Creates jobs in response to host events.
pub struct Trigger {
    scm: SharedScmClient,
    jobs: Arc<dyn ResourceClient<Job>>,
    launcher: Arc<dyn PipelineLauncher>,
    changes: ChangeCache,
}

impl Trigger {
    pub fn new(
        scm: SharedScmClient,
        jobs: Arc<dyn ResourceClient<Job>>,
        launcher: Arc<dyn PipelineLauncher>,
    ) -> Self {
        Self {
            scm,
            jobs,
            launcher,
            changes: ChangeCache::new(),
        }
    }

    pub fn scm(&self) -> &SharedScmClient {
        &self.scm
    }

    pub fn jobs(&self) -> &Arc<dyn ResourceClient<Job>> {
        &self.jobs
    }
}
