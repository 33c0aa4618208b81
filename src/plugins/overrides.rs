//! `/override <context>...`: repo admins replace failing contexts with a
//! synthetic success.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{Plugin, PluginError};
use crate::cluster::ResourceClient;
use crate::commands::override_contexts;
use crate::config::Config;
use crate::jobs::{Job, JobState, JobType, new_job};
use crate::scm::{Permission, SharedScmClient};
use crate::trigger::run::{presubmit_spec, refs_for_pull};
use crate::types::{StatusInput, StatusState};
use crate::webhooks::{CommentAction, GenericComment, Webhook, WebhookKind};

pub fn override_description(user: &str) -> String {
    format!("Overridden by {user}")
}

pub struct OverridePlugin {
    scm: SharedScmClient,
    jobs: Arc<dyn ResourceClient<Job>>,
}

impl OverridePlugin {
    pub fn new(scm: SharedScmClient, jobs: Arc<dyn ResourceClient<Job>>) -> Self {
        Self { scm, jobs }
    }

    #[instrument(skip_all, fields(repo = %gc.repo, pr = %gc.number, author = %gc.author))]
    async fn handle_comment(&self, config: &Config, gc: &GenericComment) -> Result<(), PluginError> {
        if !gc.is_pr || gc.action != CommentAction::Created || !gc.is_open() {
            return Ok(());
        }
        let requested = override_contexts(&gc.body);
        if requested.is_empty() {
            return Ok(());
        }
        let scm = self.scm.as_ref();
        if !scm.has_permission(&gc.repo, &gc.author, Permission::Admin).await? {
            let body = format!(
                "@{}: you are not authorized to override contexts; only repository admins can.",
                gc.author
            );
            scm.create_comment(&gc.repo, gc.number, &body).await?;
            return Ok(());
        }

        let pr = scm.get_pull_request(&gc.repo, gc.number).await?;
        let presubmits = config.presubmits_for(&pr.repo);
        let known: BTreeSet<&str> = pr
            .contexts
            .iter()
            .map(|c| c.context.as_str())
            .chain(presubmits.iter().map(|p| p.context.as_str()))
            .collect();
        let unknown: Vec<&str> = requested
            .iter()
            .map(String::as_str)
            .filter(|c| !known.contains(c))
            .collect();
        if !unknown.is_empty() {
            let body = format!(
                "@{}: the following unknown contexts were given: {}. Only contexts on this PR can be overridden.",
                gc.author,
                unknown.join(", ")
            );
            scm.create_comment(&pr.repo, pr.number, &body).await?;
            return Ok(());
        }

        let description = override_description(&gc.author);
        for context in &requested {
            if pr
                .context(context)
                .is_some_and(|c| c.state == StatusState::Success)
            {
                debug!(context = %context, "context already passing");
                continue;
            }
            let status = StatusInput {
                state: StatusState::Success,
                label: context.clone(),
                description: description.clone(),
                target_url: String::new(),
            };
            scm.create_status(&pr.repo, &pr.head_sha, &status).await?;
            info!(context = %context, sha = %pr.head_sha.short(), "overrode context");

            // The keeper reads job records, not statuses.
            if let Some(p) = presubmits.iter().find(|p| &p.context == context) {
                let spec = presubmit_spec(p, JobType::Presubmit, refs_for_pull(&pr));
                let mut job = new_job(&config.pipeline.namespace, spec, &p.labels, &p.annotations);
                job.status.state = JobState::Success;
                job.status.completion_time = Some(Utc::now());
                job.status.description = description.clone();
                job.status.last_reported_state = Some(JobState::Success);
                job.status.last_reported_description = description.clone();
                self.jobs.create(job).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for OverridePlugin {
    fn name(&self) -> &'static str {
        "override"
    }

    fn handles(&self, kind: WebhookKind) -> bool {
        kind.is_comment()
    }

    async fn handle(&self, config: &Config, hook: &Webhook) -> Result<(), PluginError> {
        match hook.generic_comment() {
            Some(gc) => self.handle_comment(config, &gc).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryStore;
    use crate::config::TEST_CONFIG;
    use crate::scm::fake::FakeScmClient;
    use crate::types::pr::test_pr;
    use crate::types::{PrNumber, RepoId, Sha, StatusContext};

    fn comment(author: &str, body: &str) -> GenericComment {
        GenericComment {
            action: CommentAction::Created,
            is_pr: true,
            issue_state: "open".to_string(),
            author: author.to_string(),
            issue_author: "author".to_string(),
            body: body.to_string(),
            link: String::new(),
            repo: RepoId::new("org", "repo"),
            assignees: Vec::new(),
            number: PrNumber(2),
            labels: Vec::new(),
            head_sha: None,
            guid: "g".to_string(),
        }
    }

    fn setup() -> (Arc<FakeScmClient>, Arc<MemoryStore<Job>>, OverridePlugin) {
        let scm = Arc::new(FakeScmClient::new("bot"));
        let mut pr = test_pr(2, "Y");
        pr.contexts = vec![StatusContext::new("failed-ctx", StatusState::Failure)];
        scm.add_pr(pr);
        scm.set_permission("root", Permission::Admin);
        scm.set_permission("dev", Permission::Write);
        let store = Arc::new(MemoryStore::<Job>::new());
        let plugin = OverridePlugin::new(scm.clone(), store.clone());
        (scm, store, plugin)
    }

    #[tokio::test]
    async fn admin_override_writes_synthetic_success() {
        let (scm, store, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("root", "/override failed-ctx"))
            .await
            .unwrap();

        let statuses = scm.created_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].repo, RepoId::new("org", "repo"));
        assert_eq!(statuses[0].sha, Sha::new("Y"));
        assert_eq!(statuses[0].status.state, StatusState::Success);
        assert_eq!(statuses[0].status.label, "failed-ctx");
        assert_eq!(statuses[0].status.description, "Overridden by root");
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn non_admins_are_refused() {
        let (scm, _store, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("dev", "/override failed-ctx"))
            .await
            .unwrap();
        assert!(scm.created_statuses().is_empty());
        assert!(scm.created_comments()[0].contains("not authorized"));
    }

    #[tokio::test]
    async fn unknown_contexts_are_refused() {
        let (scm, _store, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("root", "/override nope failed-ctx"))
            .await
            .unwrap();
        assert!(scm.created_statuses().is_empty());
        assert!(scm.created_comments()[0].contains("nope"));
    }

    #[tokio::test]
    async fn overriding_a_presubmit_records_a_passing_job() {
        let (scm, store, plugin) = setup();
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        plugin
            .handle_comment(&config, &comment("root", "/override foo"))
            .await
            .unwrap();

        assert_eq!(scm.created_statuses().len(), 1);
        let jobs = store.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].spec.job, "foo");
        assert_eq!(jobs[0].status.state, JobState::Success);
        assert_eq!(jobs[0].head_sha(), Some(&Sha::new("Y")));
        assert_eq!(jobs[0].status.last_reported_state, Some(JobState::Success));
    }
}
