//! Re-runs pipeline runs that failed for infrastructure reasons.
//!
//! A run whose `Succeeded` condition is false with a message naming a known
//! transient cause (quota, pod scheduling, image pulls) is marked with
//! [`FAILED_AND_RERUN_LABEL`] and replaced by a copy under a fresh name.
//! The label keeps the same failure from being retried twice.

pub mod pipeline_run;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::patch::create_merge_patch;
use crate::cluster::{ClusterError, LabelSelector, ObjectMeta, ResourceClient};
use crate::config::ConfigAgent;

pub use pipeline_run::PipelineRun;

pub const FAILED_AND_RERUN_LABEL: &str = "failed-and-rerun";

const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARS: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_CHARS[rng.gen_range(0..SUFFIX_CHARS.len())]))
        .collect()
}

/// Name for the replacement of `run`.
pub fn rerun_name(run: &PipelineRun) -> String {
    let base = run.pipeline_ref_name().unwrap_or(&run.metadata.name);
    format!("{base}-{}", random_suffix())
}

pub struct Retrier {
    config: Arc<ConfigAgent>,
    runs: Arc<dyn ResourceClient<PipelineRun>>,
}

impl Retrier {
    pub fn new(config: Arc<ConfigAgent>, runs: Arc<dyn ResourceClient<PipelineRun>>) -> Self {
        Self { config, runs }
    }

    /// Retries every transiently failed run once. Returns the replacements.
    #[instrument(skip_all)]
    pub async fn check(&self) -> Result<Vec<PipelineRun>, ClusterError> {
        let config = self.config.current();
        let messages = &config.retrier.transient_messages;
        let candidates: Vec<PipelineRun> = self
            .runs
            .list(&config.pipeline.namespace, &LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|r| !r.metadata.labels.contains_key(FAILED_AND_RERUN_LABEL))
            .filter(|r| r.failed_with_any(messages))
            .collect();
        debug!(candidates = candidates.len(), "checked pipeline runs");

        let mut replacements = Vec::new();
        for run in candidates {
            match self.retry(&run).await {
                Ok(replacement) => replacements.push(replacement),
                Err(e) => warn!(run = %run.metadata.name, error = %e, "failed to retry pipeline run"),
            }
        }
        Ok(replacements)
    }

    async fn retry(&self, run: &PipelineRun) -> Result<PipelineRun, ClusterError> {
        let marked = BTreeMap::from([(FAILED_AND_RERUN_LABEL.to_string(), "true".to_string())]);
        let patch = create_merge_patch(
            &json!({ "metadata": { "labels": run.metadata.labels } }),
            &json!({ "metadata": { "labels": marked } }),
        );
        self.runs
            .patch(&run.metadata.namespace, &run.metadata.name, &patch)
            .await?;

        let replacement = PipelineRun {
            metadata: ObjectMeta {
                labels: run.metadata.labels.clone(),
                ..ObjectMeta::new(run.metadata.namespace.clone(), rerun_name(run))
            },
            spec: run.spec.clone(),
            status: Default::default(),
        };
        let created = self.runs.create(replacement).await?;
        info!(
            failed = %run.metadata.name,
            rerun = %created.metadata.name,
            "re-ran pipeline after a transient failure"
        );
        Ok(created)
    }

    /// Checks on `retrier.period_seconds` until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.check().await {
                error!(error = %e, "pipeline retry check failed");
            }
            let period = self.config.current().retrier.period();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
        info!("stopping pipeline retrier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryStore;
    use crate::config::Config;
    use pipeline_run::failed_run;

    fn retrier() -> (Arc<MemoryStore<PipelineRun>>, Retrier) {
        let store = Arc::new(MemoryStore::<PipelineRun>::new());
        let config = Arc::new(ConfigAgent::from_config(Config::default()));
        (store.clone(), Retrier::new(config, store))
    }

    #[test]
    fn rerun_names_prefer_the_pipeline_ref() {
        let run = failed_run("org-repo-pr-1-abc", "exceeded quota");
        let name = rerun_name(&run);
        let (base, suffix) = name.rsplit_once('-').unwrap();
        assert_eq!(base, "build");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_CHARS.contains(&b)));

        let mut bare = run;
        bare.spec = json!({"pipelineSpec": {}});
        assert!(rerun_name(&bare).starts_with("org-repo-pr-1-abc-"));
    }

    #[tokio::test]
    async fn transient_failures_are_rerun_once() {
        let (store, retrier) = retrier();
        let mut quota = failed_run("quota", "pods \"x\" is forbidden: exceeded quota: compute");
        quota.metadata.labels = BTreeMap::from([
            ("app".to_string(), "build".to_string()),
            ("lighthouse.jenkins-x.io/buildNum".to_string(), "3".to_string()),
        ]);
        store.create(quota.clone()).await.unwrap();
        store.create(failed_run("broken", "step test exited 1")).await.unwrap();

        let replacements = retrier.check().await.unwrap();
        assert_eq!(replacements.len(), 1);
        let rerun = &replacements[0];
        assert!(rerun.metadata.name.starts_with("build-"));
        assert_eq!(rerun.metadata.labels, quota.metadata.labels);
        assert_eq!(rerun.spec, quota.spec);
        assert!(rerun.status.conditions.is_empty());

        let marked = store.get("jx", "quota").await.unwrap();
        assert_eq!(
            marked.metadata.labels,
            BTreeMap::from([(FAILED_AND_RERUN_LABEL.to_string(), "true".to_string())])
        );
        assert_eq!(marked.spec, quota.spec);

        assert!(retrier.check().await.unwrap().is_empty());
        assert_eq!(store.snapshot().len(), 3);
    }
}
