use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::cluster::MemoryStore;
use crate::config::Config;
use crate::jobs::job::test_job;
use crate::jobs::labels::BUILD_NUM_LABEL;
use crate::jobs::{ActivityState, JobState, new_job};
use crate::jobs::activity::test_activity;
use crate::queue::RateLimiter;
use crate::scm::fake::FakeScmClient;
use crate::scm::fake::CreatedStatus;
use crate::types::StatusState;

struct Harness {
    scm: Arc<FakeScmClient>,
    jobs: Arc<MemoryStore<Job>>,
    activities: Arc<MemoryStore<Activity>>,
    controller: Arc<Controller>,
}

fn harness() -> Harness {
    let scm = Arc::new(FakeScmClient::new("bot"));
    let jobs = Arc::new(MemoryStore::<Job>::new());
    let activities = Arc::new(MemoryStore::<Activity>::new());
    let config = Arc::new(ConfigAgent::from_config(Config::default()));
    let controller = Controller::new(config, scm.clone(), jobs.clone(), activities.clone(), "jx");
    Harness {
        scm,
        jobs,
        activities,
        controller,
    }
}

async fn launched_job(store: &MemoryStore<Job>, activity: &str, build: &str) -> Job {
    let spec = test_job("unused", "unit", 7, "abc", JobState::Triggered).spec;
    let mut job = new_job("jx", spec, &Default::default(), &Default::default());
    job.status.activity_name = activity.to_string();
    job.status.build_id = build.to_string();
    job.status.description = "Job triggered.".to_string();
    job.metadata
        .labels
        .insert(BUILD_NUM_LABEL.to_string(), build.to_string());
    store.create(job).await.unwrap()
}

async fn wait_for_statuses(scm: &FakeScmClient, n: usize) -> Vec<CreatedStatus> {
    for _ in 0..400 {
        let statuses = scm.created_statuses();
        if statuses.len() >= n {
            return statuses;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scm.created_statuses()
}

#[test]
fn queue_keys() {
    assert_eq!(QueueKey::parse("job:::jx/abc"), Some(QueueKey::Job("jx/abc".to_string())));
    assert_eq!(
        QueueKey::parse("activity:::jx/org-repo-pr-1-1"),
        Some(QueueKey::Activity("jx/org-repo-pr-1-1".to_string()))
    );
    assert_eq!(QueueKey::parse("job:::noslash"), None);
    assert_eq!(QueueKey::parse("pod:::jx/a"), None);
    assert_eq!(QueueKey::Job("jx/a".to_string()).to_string(), "job:::jx/a");
}

#[tokio::test]
async fn malformed_keys_are_errors() {
    let h = harness();
    assert!(matches!(
        h.controller.process("nonsense").await,
        Err(ControllerError::BadKey(_))
    ));
}

#[tokio::test]
async fn activity_progress_reaches_the_commit_status() {
    let h = harness();
    let job = launched_job(&h.jobs, "org-repo-pr-7-1", "1").await;
    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.controller.clone().run(2, cancel.clone()));

    let statuses = wait_for_statuses(&h.scm, 1).await;
    assert_eq!(statuses[0].status.state, StatusState::Pending);
    assert_eq!(statuses[0].status.description, "Job triggered.");

    h.activities
        .create(test_activity("org-repo-pr-7-1", "1", ActivityState::Succeeded))
        .await
        .unwrap();
    let statuses = wait_for_statuses(&h.scm, 2).await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1].status.state, StatusState::Success);
    assert_eq!(statuses[1].status.label, "unit");
    assert_eq!(statuses[1].status.description, "Pipeline successful");

    // Nothing further is reported once the final state is out.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.scm.created_statuses().len(), 2);
    let stored = h.jobs.get("jx", job.name()).await.unwrap();
    assert_eq!(stored.status.state, JobState::Success);
    assert_eq!(stored.status.last_reported_state, Some(JobState::Success));

    cancel.cancel();
    run.await.unwrap();
    assert!(h.controller.queue().is_shutting_down());
}

#[tokio::test]
async fn deleted_objects_are_skipped() {
    let h = harness();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(h.controller.clone().run(1, cancel.clone()));
    while !h.controller.has_synced() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.controller.process("job:::jx/missing").await.unwrap();
    h.controller.process("activity:::jx/missing").await.unwrap();
    cancel.cancel();
    run.await.unwrap();
}

/// Lets every key through at once and remembers which keys asked.
#[derive(Default)]
struct RecordingLimiter {
    keys: Arc<Mutex<Vec<String>>>,
}

impl RateLimiter for RecordingLimiter {
    fn when(&self, key: &str) -> Duration {
        self.keys.lock().unwrap().push(key.to_string());
        Duration::ZERO
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

#[tokio::test]
async fn informer_events_pass_through_the_rate_limiter() {
    let limiter = RecordingLimiter::default();
    let keys = limiter.keys.clone();
    let scm = Arc::new(FakeScmClient::new("bot"));
    let jobs = Arc::new(MemoryStore::<Job>::new());
    let activities = Arc::new(MemoryStore::<Activity>::new());
    let config = Arc::new(ConfigAgent::from_config(Config::default()));
    let job = launched_job(&jobs, "org-repo-pr-7-1", "1").await;
    let controller = Controller::with_queue(
        config,
        scm.clone(),
        jobs,
        activities.clone(),
        "jx",
        WorkQueue::new(Box::new(limiter)),
    );
    let cancel = CancellationToken::new();
    let run = tokio::spawn(controller.clone().run(1, cancel.clone()));

    activities
        .create(test_activity("org-repo-pr-7-1", "1", ActivityState::Running))
        .await
        .unwrap();
    wait_for_statuses(&scm, 1).await;
    for _ in 0..400 {
        if keys.lock().unwrap().iter().any(|k| k.starts_with("activity:::")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let seen = keys.lock().unwrap().clone();
    assert!(seen.contains(&format!("job:::jx/{}", job.name())), "{seen:?}");
    assert!(seen.contains(&"activity:::jx/org-repo-pr-7-1".to_string()), "{seen:?}");

    cancel.cancel();
    run.await.unwrap();
}
