//! The minimal interface to the pipeline engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::activity::{Activity, ActivitySpec, ActivityState};
use super::job::Job;
use super::labels::{
    BRANCH_LABEL, BUILD_NUM_LABEL, CONTEXT_LABEL, LABEL_PREFIX, ORG_LABEL, REPO_LABEL, label_value,
};
use crate::cluster::{ClusterError, ObjectMeta, ResourceClient};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("job {0} has no refs to build")]
    MissingRefs(String),

    #[error("pipeline engine rejected the job: {0}")]
    Engine(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// What the engine reports back for a started pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedPipeline {
    pub activity_name: String,
    pub build_number: u64,
}

#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    async fn launch(&self, job: &Job) -> Result<LaunchedPipeline, LaunchError>;
}

/// The branch segment used in activity names and labels: `PR-<n>` for a
/// single-pull presubmit, the base ref otherwise.
pub fn build_branch(job: &Job) -> Option<String> {
    let refs = job.spec.refs.as_ref()?;
    Some(match job.pull_number() {
        Some(n) => format!("PR-{}", n.0),
        None if refs.pulls.len() > 1 => "batch".to_string(),
        None => refs.base_ref.clone(),
    })
}

/// Pipeline settings applied to every launch unless the job overrides them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDefaults {
    pub service_account: Option<String>,
    pub image: Option<String>,
}

impl PipelineDefaults {
    fn annotations(&self) -> impl Iterator<Item = (String, String)> + '_ {
        [("serviceAccount", &self.service_account), ("defaultImage", &self.image)]
            .into_iter()
            .filter_map(|(key, value)| Some((format!("{LABEL_PREFIX}{key}"), value.clone()?)))
    }
}

pub fn activity_name(org: &str, repo: &str, branch: &str, build: u64) -> String {
    format!("{org}-{repo}-{branch}-{build}").to_lowercase()
}

/// Hands out consecutive build numbers per (org, repo, branch) and, when
/// given a store, records a pending activity for every launch.
pub struct BuildNumberLauncher {
    counters: Mutex<HashMap<(String, String, String), u64>>,
    activities: Option<(Arc<dyn ResourceClient<Activity>>, String)>,
    defaults: PipelineDefaults,
}

impl Default for BuildNumberLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildNumberLauncher {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            activities: None,
            defaults: PipelineDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: PipelineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_activities(
        mut self,
        store: Arc<dyn ResourceClient<Activity>>,
        namespace: impl Into<String>,
    ) -> Self {
        self.activities = Some((store, namespace.into()));
        self
    }

    fn next_build(&self, org: &str, repo: &str, branch: &str) -> u64 {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let n = counters
            .entry((org.to_string(), repo.to_string(), branch.to_string()))
            .or_insert(0);
        *n += 1;
        *n
    }
}

#[async_trait]
impl PipelineLauncher for BuildNumberLauncher {
    async fn launch(&self, job: &Job) -> Result<LaunchedPipeline, LaunchError> {
        let refs = job
            .spec
            .refs
            .as_ref()
            .ok_or_else(|| LaunchError::MissingRefs(job.name().to_string()))?;
        let branch = build_branch(job).unwrap_or_else(|| refs.base_ref.clone());
        let build_number = self.next_build(&refs.org, &refs.repo, &branch);
        let name = activity_name(&refs.org, &refs.repo, &branch, build_number);
        debug!(job = %job.name(), activity = %name, "launching pipeline");

        if let Some((store, namespace)) = &self.activities {
            let mut metadata = ObjectMeta::new(namespace.clone(), name.clone());
            for (key, value) in [
                (ORG_LABEL, refs.org.as_str()),
                (REPO_LABEL, refs.repo.as_str()),
                (BRANCH_LABEL, branch.as_str()),
                (CONTEXT_LABEL, job.spec.context.as_str()),
            ] {
                if let Some(value) = label_value(value) {
                    metadata.labels.insert(key.to_string(), value);
                }
            }
            metadata
                .labels
                .insert(BUILD_NUM_LABEL.to_string(), build_number.to_string());
            metadata.annotations.extend(self.defaults.annotations());
            store
                .create(Activity {
                    metadata,
                    spec: ActivitySpec {
                        owner: refs.org.clone(),
                        repo: refs.repo.clone(),
                        branch: branch.clone(),
                        build: build_number.to_string(),
                        context: job.spec.context.clone(),
                        status: ActivityState::Pending,
                        last_commit_sha: job.head_sha().cloned(),
                        ..Default::default()
                    },
                })
                .await?;
        }

        Ok(LaunchedPipeline {
            activity_name: name,
            build_number,
        })
    }
}
