use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};

use super::filter::Filter;
use super::trust::{NEEDS_OK_TO_TEST_LABEL, OK_TO_TEST_LABEL, trusted_pull_request, trusted_user};
use super::{Trigger, TriggerError};
use crate::cluster::LabelSelector;
use crate::commands::{is_explicit_test, is_ok_to_test, is_retest, is_test_all};
use crate::config::Config;
use crate::jobs::labels::{ORG_LABEL, PULL_LABEL, REPO_LABEL, trim_label};
use crate::jobs::{Job, JobState};
use crate::scm::pruner::CommentPruner;
use crate::types::{PullRequest, StatusState};
use crate::webhooks::{CommentAction, GenericComment};

pub const UNTRUSTED_PR_MESSAGE: &str =
    "Cannot trigger testing until a trusted user reviews the PR and leaves an `/ok-to-test` message.";

pub fn untrusted_pr_comment(commenter: &str) -> String {
    format!("@{commenter}: {UNTRUSTED_PR_MESSAGE}")
}

impl Trigger {
    /// Handles `/ok-to-test`, `/test`, and `/retest` comments on open pull
    /// requests.
    #[instrument(skip_all, fields(repo = %gc.repo, pr = %gc.number, author = %gc.author))]
    pub async fn handle_generic_comment(
        &self,
        config: &Config,
        gc: &GenericComment,
    ) -> Result<(), TriggerError> {
        if !gc.is_pr || gc.action != CommentAction::Created || !gc.is_open() {
            return Ok(());
        }
        if gc.author == self.scm.bot_name() {
            return Ok(());
        }
        let policy = config.trigger_for(&gc.repo);
        let ok_to_test = !policy.ignore_ok_to_test && is_ok_to_test(&gc.body);
        let test_all = is_test_all(&gc.body);
        let explicit = is_explicit_test(&gc.body);
        let retest = is_retest(&gc.body);
        if !(ok_to_test || test_all || explicit || retest) {
            return Ok(());
        }

        let scm = self.scm.as_ref();
        let mut pr = scm.get_pull_request(&gc.repo, gc.number).await?;
        let commenter_trusted = trusted_user(scm, &policy, &gc.repo, &gc.author).await?;
        let mut pr_trusted =
            trusted_pull_request(scm, &policy, &gc.repo, &pr.author, &pr.labels).await?;

        // Anyone may ask for tests on a trusted PR; only trusted users vouch.
        let ok_to_test = ok_to_test && commenter_trusted;
        if !commenter_trusted && (!pr_trusted || !(test_all || explicit || retest)) {
            debug!("ignoring test request from untrusted commenter");
            return Ok(());
        }

        if ok_to_test && commenter_trusted && !pr.has_label(OK_TO_TEST_LABEL) {
            scm.add_label(&pr.repo, pr.number, OK_TO_TEST_LABEL).await?;
            pr.labels.push(OK_TO_TEST_LABEL.to_string());
            pr_trusted = true;
        }

        if !pr_trusted {
            info!("test requested on untrusted pull request");
            scm.create_comment(&pr.repo, pr.number, &untrusted_pr_comment(&gc.author))
                .await?;
            return Ok(());
        }

        if pr.has_label(NEEDS_OK_TO_TEST_LABEL) {
            scm.remove_label(&pr.repo, pr.number, NEEDS_OK_TO_TEST_LABEL)
                .await?;
        }
        let pruner = CommentPruner::new(self.scm.clone(), pr.repo.clone(), pr.number);
        pruner
            .prune_comments(|c| c.body.contains(UNTRUSTED_PR_MESSAGE))
            .await?;

        let mut filters = Vec::new();
        if test_all || ok_to_test {
            filters.push(Filter::TestAll);
        }
        if explicit {
            filters.push(Filter::Command(gc.body.clone()));
        }
        if retest {
            let (failed, all) = self
                .context_results(&config.pipeline.namespace, &pr)
                .await?;
            filters.push(Filter::Retest { failed, all });
        }
        let filter = match filters.len() {
            1 => filters.remove(0),
            _ => Filter::Union(filters),
        };
        self.filter_and_run(config, &pr, &filter).await?;
        Ok(())
    }

    /// Failed and known contexts at the PR head. Job records override
    /// statuses read from the host, and the newest job per context wins.
    async fn context_results(
        &self,
        namespace: &str,
        pr: &PullRequest,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>), TriggerError> {
        let mut failed = BTreeSet::new();
        let mut all = BTreeSet::new();
        for status in &pr.contexts {
            all.insert(status.context.clone());
            if matches!(status.state, StatusState::Failure | StatusState::Error) {
                failed.insert(status.context.clone());
            }
        }

        let selector = LabelSelector::everything()
            .with(ORG_LABEL, trim_label(&pr.repo.owner))
            .with(REPO_LABEL, trim_label(&pr.repo.repo))
            .with(PULL_LABEL, pr.number.0.to_string());
        let mut latest: BTreeMap<String, Job> = BTreeMap::new();
        for job in self.jobs.list(namespace, &selector).await? {
            if job.head_sha() != Some(&pr.head_sha) {
                continue;
            }
            match latest.get(&job.spec.context) {
                Some(seen) if seen.status.start_time >= job.status.start_time => {}
                _ => {
                    latest.insert(job.spec.context.clone(), job);
                }
            }
        }
        for (context, job) in latest {
            all.insert(context.clone());
            match job.status.state {
                JobState::Failure | JobState::Error | JobState::Aborted => {
                    failed.insert(context);
                }
                _ => {
                    failed.remove(&context);
                }
            }
        }
        Ok((failed, all))
    }
}
