//! Folds pipeline activity progress into the owning job's status.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::ControllerError;
use crate::cluster::{LabelSelector, ResourceClient};
use crate::jobs::labels::{BRANCH_LABEL, BUILD_NUM_LABEL, CONTEXT_LABEL, ORG_LABEL, REPO_LABEL, label_value};
use crate::jobs::{Activity, ActivitySpec, Job, to_job_status};

/// Selects the jobs that may own an activity. Fields that cannot be label
/// values are left out, so the selector only narrows the candidates; the
/// owner is picked by activity name.
pub fn job_selector(spec: &ActivitySpec) -> LabelSelector {
    let mut selector = LabelSelector::everything();
    for (key, value) in [
        (ORG_LABEL, &spec.owner),
        (REPO_LABEL, &spec.repo),
        (BRANCH_LABEL, &spec.branch),
        (BUILD_NUM_LABEL, &spec.build),
        (CONTEXT_LABEL, &spec.context),
    ] {
        if let Some(value) = label_value(value).filter(|v| !v.is_empty()) {
            selector = selector.with(key, value);
        }
    }
    selector
}

pub struct ActivityReconciler {
    jobs: Arc<dyn ResourceClient<Job>>,
}

impl ActivityReconciler {
    pub fn new(jobs: Arc<dyn ResourceClient<Job>>) -> Self {
        Self { jobs }
    }

    /// Updates the job that launched `activity`. Returns the updated job, or
    /// `None` if there is no such job or nothing changed.
    #[instrument(skip_all, fields(activity = %activity.metadata.name))]
    pub async fn reconcile(&self, activity: &Activity) -> Result<Option<Job>, ControllerError> {
        let selector = job_selector(&activity.spec);
        let candidates = self.jobs.list(&activity.metadata.namespace, &selector).await?;
        let Some(job) = candidates
            .into_iter()
            .find(|j| j.status.activity_name == activity.metadata.name)
        else {
            debug!(selector = %selector, "no job owns this activity");
            return Ok(None);
        };

        let next = to_job_status(activity, &job.status);
        if next == job.status {
            return Ok(None);
        }
        if !job.status.state.can_transition_to(next.state) {
            debug!(job = %job.name(), from = %job.status.state, to = %next.state, "ignoring backwards transition");
            return Ok(None);
        }
        info!(job = %job.name(), from = %job.status.state, to = %next.state, "updating job from activity");
        let mut updated = job;
        updated.status = next;
        Ok(Some(self.jobs.update(updated).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryStore;
    use crate::jobs::activity::test_activity;
    use crate::jobs::job::test_job;
    use crate::jobs::{ActivityState, JobState, Stage, new_job};
    use crate::types::Sha;

    /// A stored job labelled the way the trigger labels launched jobs.
    async fn launched(store: &MemoryStore<Job>, activity: &str, build: &str, state: JobState) -> Job {
        let template = test_job("unused", "unit", 7, "abc", state);
        let mut job = new_job("jx", template.spec, &Default::default(), &Default::default());
        job.status.state = state;
        job.status.activity_name = activity.to_string();
        job.status.build_id = build.to_string();
        job.metadata
            .labels
            .insert(BUILD_NUM_LABEL.to_string(), build.to_string());
        store.create(job).await.unwrap()
    }

    #[test]
    fn selector_uses_every_identifying_field() {
        let activity = test_activity("org-repo-pr-7-3", "3", ActivityState::Running);
        let selector = job_selector(&activity.spec);
        assert_eq!(selector.0.len(), 5);
        assert_eq!(selector.0[BRANCH_LABEL], "PR-7");
        assert_eq!(selector.0[BUILD_NUM_LABEL], "3");
    }

    #[tokio::test]
    async fn running_activity_moves_job_forward() {
        let store = Arc::new(MemoryStore::<Job>::new());
        launched(&store, "org-repo-pr-7-2", "2", JobState::Triggered).await;
        let owner = launched(&store, "org-repo-pr-7-3", "3", JobState::Triggered).await;
        let reconciler = ActivityReconciler::new(store.clone());

        let mut activity = test_activity("org-repo-pr-7-3", "3", ActivityState::Running);
        activity.spec.stages = vec![Stage {
            name: "test".to_string(),
            status: ActivityState::Running,
        }];
        activity.spec.last_commit_sha = Some(Sha::new("abc"));
        let updated = reconciler.reconcile(&activity).await.unwrap().unwrap();
        assert_eq!(updated.name(), owner.name());
        assert_eq!(updated.status.state, JobState::Running);
        assert_eq!(updated.status.description, "Pipeline running stage(s): test");

        // Same activity again is a no-op.
        assert!(reconciler.reconcile(&activity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_jobs_do_not_move_backwards() {
        let store = Arc::new(MemoryStore::<Job>::new());
        launched(&store, "org-repo-pr-7-3", "3", JobState::Aborted).await;
        let reconciler = ActivityReconciler::new(store.clone());
        let activity = test_activity("org-repo-pr-7-3", "3", ActivityState::Running);
        assert!(reconciler.reconcile(&activity).await.unwrap().is_none());
        assert_eq!(store.snapshot()[0].status.state, JobState::Aborted);
    }

    #[tokio::test]
    async fn unowned_activities_are_ignored() {
        let store = Arc::new(MemoryStore::<Job>::new());
        launched(&store, "org-repo-pr-7-1", "1", JobState::Pending).await;
        let reconciler = ActivityReconciler::new(store.clone());
        let activity = test_activity("org-repo-pr-7-9", "9", ActivityState::Succeeded);
        assert!(reconciler.reconcile(&activity).await.unwrap().is_none());
    }
}
