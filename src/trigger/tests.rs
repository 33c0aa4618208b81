//! Event-to-job scenarios against the fake host and the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::cluster::{MemoryStore, ResourceClient};
use crate::config::Config;
use crate::jobs::job::test_job;
use crate::jobs::{BuildNumberLauncher, JobState, JobType, LaunchedPipeline, new_job};
use crate::scm::fake::FakeScmClient;
use crate::types::pr::test_pr;
use crate::types::{PrNumber, PullRequest, RepoId, Sha, StatusContext, StatusState};
use crate::webhooks::{
    CommentAction, GenericComment, PrAction, PrChanges, PullRequestHook, PushCommit, PushHook,
};

const THREE_JOBS: &str = r#"
presubmits:
  org/repo:
    - name: foo
      always_run: true
    - name: bar
      always_run: true
    - name: baz
      always_run: true
    - name: docs
      run_if_changed: '^docs/'
postsubmits:
  org/repo:
    - name: deploy
      branches: [master]
triggers:
  - repos: [org]
    join_org_url: https://example.com/join
"#;

struct Harness {
    scm: Arc<FakeScmClient>,
    store: Arc<MemoryStore<Job>>,
    trigger: Trigger,
    config: Config,
}

fn harness_with(yaml: &str, launcher: Arc<dyn PipelineLauncher>) -> Harness {
    let scm = Arc::new(FakeScmClient::new("bot"));
    let store = Arc::new(MemoryStore::<Job>::new());
    let trigger = Trigger::new(scm.clone(), store.clone(), launcher);
    Harness {
        scm,
        store,
        trigger,
        config: Config::from_yaml(yaml).unwrap(),
    }
}

fn harness() -> Harness {
    harness_with(THREE_JOBS, Arc::new(BuildNumberLauncher::new()))
}

fn repo() -> RepoId {
    RepoId::new("org", "repo")
}

fn pr_hook(action: PrAction, pr: PullRequest) -> PullRequestHook {
    PullRequestHook {
        action,
        repo: repo(),
        sender: pr.author.clone(),
        pull_request: pr,
        label: None,
        changes: PrChanges::default(),
        guid: "guid".to_string(),
    }
}

fn comment(number: u64, author: &str, body: &str) -> GenericComment {
    GenericComment {
        action: CommentAction::Created,
        is_pr: true,
        issue_state: "open".to_string(),
        author: author.to_string(),
        issue_author: "author".to_string(),
        body: body.to_string(),
        link: String::new(),
        repo: repo(),
        assignees: Vec::new(),
        number: PrNumber(number),
        labels: Vec::new(),
        head_sha: None,
        guid: "guid".to_string(),
    }
}

fn job_names(store: &MemoryStore<Job>) -> Vec<String> {
    let mut names: Vec<String> = store.snapshot().into_iter().map(|j| j.spec.job).collect();
    names.sort();
    names
}

async fn seed_job(store: &MemoryStore<Job>, job: &str, number: u64, sha: &str, state: JobState) {
    let template = test_job("seed", job, number, sha, state);
    let mut seeded = new_job("jx", template.spec, &BTreeMap::new(), &BTreeMap::new());
    seeded.status.state = state;
    store.create(seeded).await.unwrap();
}

struct FailingLauncher;

#[async_trait]
impl PipelineLauncher for FailingLauncher {
    async fn launch(&self, _job: &Job) -> Result<LaunchedPipeline, LaunchError> {
        Err(LaunchError::Engine("engine unavailable".to_string()))
    }
}

#[tokio::test]
async fn trusted_open_runs_presubmits_and_skips_the_rest() {
    let h = harness();
    h.scm.add_member("org", "author");
    h.scm.set_changes(&repo(), PrNumber(1), &["src/lib.rs"]);
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());

    h.trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Opened, pr))
        .await
        .unwrap();

    assert_eq!(job_names(&h.store), vec!["bar", "baz", "foo"]);
    let statuses = h.scm.created_statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status.label, "docs");
    assert_eq!(statuses[0].status.state, StatusState::Success);
    assert_eq!(statuses[0].status.description, "Skipped.");
    assert_eq!(statuses[0].sha, Sha::new("x"));
    for job in h.store.snapshot() {
        assert_eq!(job.status.state, JobState::Triggered);
        assert!(!job.status.activity_name.is_empty());
        assert_eq!(job.head_sha(), Some(&Sha::new("x")));
    }
}

#[tokio::test]
async fn untrusted_open_is_welcomed_not_built() {
    let h = harness();
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());

    h.trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Opened, pr))
        .await
        .unwrap();

    assert!(h.store.snapshot().is_empty());
    let comments = h.scm.created_comments();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("@author"));
    assert!(comments[0].contains("https://example.com/join"));
    assert_eq!(h.scm.labels(&repo(), PrNumber(1)), vec![NEEDS_OK_TO_TEST_LABEL]);
}

#[tokio::test]
async fn replayed_event_creates_nothing_new() {
    let h = harness();
    h.scm.add_member("org", "author");
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());
    let hook = pr_hook(PrAction::Synchronize, pr);

    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();
    let first = job_names(&h.store);
    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();

    assert_eq!(job_names(&h.store), first);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn new_head_aborts_older_runs() {
    let h = harness();
    h.scm.add_member("org", "author");
    let old = test_pr(1, "x");
    h.scm.add_pr(old.clone());
    h.trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Opened, old))
        .await
        .unwrap();

    let new = test_pr(1, "y");
    h.scm.add_pr(new.clone());
    h.trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Synchronize, new))
        .await
        .unwrap();

    let jobs = h.store.snapshot();
    assert_eq!(jobs.len(), 6);
    for job in jobs {
        if job.head_sha() == Some(&Sha::new("x")) {
            assert_eq!(job.status.state, JobState::Aborted);
            assert_eq!(job.status.last_reported_state, Some(JobState::Aborted));
        } else {
            assert_eq!(job.status.state, JobState::Triggered);
        }
    }
}

#[tokio::test]
async fn retest_reruns_only_failed_jobs() {
    let h = harness();
    h.scm.add_member("org", "alice");
    h.scm.add_member("org", "author");
    h.scm.add_pr(test_pr(1, "x"));
    seed_job(&h.store, "foo", 1, "x", JobState::Success).await;
    seed_job(&h.store, "bar", 1, "x", JobState::Failure).await;
    seed_job(&h.store, "baz", 1, "x", JobState::Pending).await;

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "alice", "/retest"))
        .await
        .unwrap();

    let created: Vec<Job> = h
        .store
        .snapshot()
        .into_iter()
        .filter(|j| j.status.state == JobState::Triggered)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].spec.job, "bar");
}

#[tokio::test]
async fn retest_ignores_results_for_other_heads() {
    let h = harness();
    h.scm.add_member("org", "alice");
    h.scm.add_member("org", "author");
    h.scm.add_pr(test_pr(1, "y"));
    for job in ["foo", "bar", "baz"] {
        seed_job(&h.store, job, 1, "x", JobState::Success).await;
    }

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "alice", "/retest"))
        .await
        .unwrap();

    let fresh: Vec<String> = h
        .store
        .snapshot()
        .into_iter()
        .filter(|j| j.head_sha() == Some(&Sha::new("y")))
        .map(|j| j.spec.job)
        .collect();
    assert_eq!(fresh.len(), 3);
}

#[tokio::test]
async fn explicit_test_runs_the_named_job() {
    let h = harness();
    h.scm.add_member("org", "author");
    h.scm.add_pr(test_pr(1, "x"));

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "author", "/test docs"))
        .await
        .unwrap();

    assert_eq!(job_names(&h.store), vec!["docs"]);
    assert!(h.scm.created_statuses().is_empty());
}

#[tokio::test]
async fn ok_to_test_trusts_and_builds() {
    let h = harness();
    h.scm.add_member("org", "alice");
    let mut pr = test_pr(1, "x");
    pr.labels = vec![NEEDS_OK_TO_TEST_LABEL.to_string()];
    h.scm.add_pr(pr);
    h.scm.add_comment(&repo(), PrNumber(1), "bot", &untrusted_pr_comment("alice"));

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "alice", "/ok-to-test"))
        .await
        .unwrap();

    assert_eq!(h.scm.labels(&repo(), PrNumber(1)), vec![OK_TO_TEST_LABEL]);
    assert_eq!(job_names(&h.store), vec!["bar", "baz", "foo"]);
    assert_eq!(h.scm.state().deleted_comments.len(), 1);
}

#[tokio::test]
async fn test_request_on_untrusted_pull_request_is_refused() {
    let h = harness();
    h.scm.add_member("org", "alice");
    h.scm.add_pr(test_pr(1, "x"));

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "alice", "/test all"))
        .await
        .unwrap();

    assert!(h.store.snapshot().is_empty());
    assert_eq!(h.scm.created_comments(), vec![untrusted_pr_comment("alice")]);
}

#[tokio::test]
async fn untrusted_commenter_may_test_a_trusted_pr() {
    let h = harness();
    h.scm.add_member("org", "author");
    h.scm.add_pr(test_pr(1, "x"));

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "mallory", "/test all"))
        .await
        .unwrap();

    assert_eq!(job_names(&h.store), vec!["bar", "baz", "foo"]);
    assert!(h.scm.labels(&repo(), PrNumber(1)).is_empty());
}

#[tokio::test]
async fn untrusted_commenters_cannot_vouch() {
    let h = harness();
    h.scm.add_member("org", "author");
    h.scm.add_pr(test_pr(1, "x"));
    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "mallory", "/ok-to-test"))
        .await
        .unwrap();
    assert!(h.store.snapshot().is_empty());
    assert!(h.scm.labels(&repo(), PrNumber(1)).is_empty());

    let h = harness();
    h.scm.add_pr(test_pr(2, "y"));
    h.trigger
        .handle_generic_comment(&h.config, &comment(2, "mallory", "/test all"))
        .await
        .unwrap();
    assert!(h.store.snapshot().is_empty());
    assert!(h.scm.created_comments().is_empty());
}

#[tokio::test]
async fn launch_failure_reports_error_status() {
    let h = harness_with(THREE_JOBS, Arc::new(FailingLauncher));
    h.scm.add_member("org", "author");
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());

    let err = h
        .trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Opened, pr))
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::Launch(ref failed) if failed.len() == 3));
    assert!(h.store.snapshot().is_empty());
    let errors: Vec<_> = h
        .scm
        .created_statuses()
        .into_iter()
        .filter(|s| s.status.state == StatusState::Error)
        .collect();
    assert_eq!(errors.len(), 3);
    assert_eq!(
        errors[0].status.description,
        "Error creating metapipeline: pipeline engine rejected the job: engine unavailable"
    );
}

#[tokio::test]
async fn overlapping_contexts_post_nothing() {
    let h = harness();
    let presubmits = h.config.presubmits_for(&repo()).to_vec();
    let partition = Partition {
        to_run: vec![presubmits[0].clone()],
        to_skip: vec![presubmits[0].clone(), presubmits[1].clone()],
    };

    let err = h
        .trigger
        .run_and_skip(&h.config, &test_pr(1, "x"), &partition)
        .await
        .unwrap_err();

    assert!(matches!(err, TriggerError::RunSkipOverlap(ref c) if c == &["foo".to_string()]));
    assert!(h.scm.created_statuses().is_empty());
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn elided_skips_post_no_status() {
    let yaml = THREE_JOBS.replace(
        "join_org_url: https://example.com/join",
        "join_org_url: https://example.com/join\n    elide_skipped_contexts: true",
    );
    let h = harness_with(&yaml, Arc::new(BuildNumberLauncher::new()));
    h.scm.add_member("org", "author");
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());

    h.trigger
        .handle_pull_request(&h.config, &pr_hook(PrAction::Opened, pr))
        .await
        .unwrap();

    assert_eq!(job_names(&h.store).len(), 3);
    assert!(h.scm.created_statuses().is_empty());
}

#[tokio::test]
async fn lgtm_builds_an_untrusted_pull_request_once() {
    let h = harness();
    let mut pr = test_pr(1, "x");
    pr.labels = vec!["lgtm".to_string()];
    h.scm.add_pr(pr.clone());
    let mut hook = pr_hook(PrAction::Labeled, pr);
    hook.label = Some(LGTM_LABEL.to_string());

    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();
    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();

    assert_eq!(job_names(&h.store), vec!["bar", "baz", "foo"]);
}

#[tokio::test]
async fn base_change_counts_as_synchronize() {
    let h = harness();
    h.scm.add_member("org", "author");
    let pr = test_pr(1, "x");
    h.scm.add_pr(pr.clone());

    let mut hook = pr_hook(PrAction::Edited, pr.clone());
    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();
    assert!(h.store.snapshot().is_empty());

    hook.changes.base_ref_changed = true;
    h.trigger.handle_pull_request(&h.config, &hook).await.unwrap();
    assert_eq!(job_names(&h.store).len(), 3);
}

#[tokio::test]
async fn failed_host_status_counts_for_retest() {
    let h = harness();
    h.scm.add_member("org", "author");
    let mut pr = test_pr(1, "x");
    pr.contexts = vec![
        StatusContext::new("foo", StatusState::Success),
        StatusContext::new("bar", StatusState::Success),
        StatusContext::new("baz", StatusState::Error),
    ];
    h.scm.add_pr(pr);

    h.trigger
        .handle_generic_comment(&h.config, &comment(1, "author", "/retest"))
        .await
        .unwrap();

    assert_eq!(job_names(&h.store), vec!["baz"]);
}

fn push(branch: &str, files: &[&str]) -> PushHook {
    PushHook {
        repo: repo(),
        ref_name: format!("refs/heads/{branch}"),
        before: Sha::new("before"),
        after: Sha::new("after"),
        created: false,
        deleted: false,
        commits: vec![PushCommit {
            id: Sha::new("after"),
            added: Vec::new(),
            modified: files.iter().map(|f| f.to_string()).collect(),
            removed: Vec::new(),
        }],
        pusher: "alice".to_string(),
        compare_link: String::new(),
        guid: "guid".to_string(),
    }
}

#[tokio::test]
async fn push_runs_matching_postsubmits() {
    let h = harness();
    h.trigger
        .handle_push(&h.config, &push("master", &["src/lib.rs"]))
        .await
        .unwrap();
    h.trigger
        .handle_push(&h.config, &push("dev", &["src/lib.rs"]))
        .await
        .unwrap();

    let jobs = h.store.snapshot();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].spec.job, "deploy");
    assert_eq!(jobs[0].spec.job_type, JobType::Postsubmit);
    assert_eq!(jobs[0].report_sha(), Some(&Sha::new("after")));
}

#[tokio::test]
async fn closed_issue_comments_are_ignored() {
    let h = harness();
    h.scm.add_member("org", "alice");
    h.scm.add_pr(test_pr(1, "x"));
    let mut gc = comment(1, "alice", "/test all");
    gc.issue_state = "closed".to_string();

    h.trigger.handle_generic_comment(&h.config, &gc).await.unwrap();
    assert!(h.store.snapshot().is_empty());
}
