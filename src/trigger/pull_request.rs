use tracing::{debug, info, instrument};

use super::filter::Filter;
use super::trust::{
    LGTM_LABEL, NEEDS_OK_TO_TEST_LABEL, OK_TO_TEST_LABEL, UPDATEBOT_LABEL, trusted_pull_request,
};
use super::{Trigger, TriggerError};
use crate::config::Config;
use crate::types::PullRequest;
use crate::webhooks::{PrAction, PullRequestHook};

/// The comment left on a pull request from an untrusted author.
pub fn welcome_message(author: &str, org: &str, join_org_url: &str) -> String {
    let mut msg = format!(
        "Hi @{author}. Thanks for your PR.\n\n\
         I'm waiting for a {org} member to verify that this patch is reasonable to test. \
         If it is, they should reply with `/ok-to-test` on its own line. Until that is done, \
         I will not automatically test new commits in this PR, but the usual testing commands \
         from org members will still work."
    );
    if !join_org_url.is_empty() {
        msg.push_str(&format!(
            " Regular contributors should [join the org]({join_org_url}) to skip this step."
        ));
    }
    msg.push_str(&format!(
        "\n\nOnce the patch is verified, the new status will be reflected by the `{OK_TO_TEST_LABEL}` label."
    ));
    msg
}

impl Trigger {
    #[instrument(skip_all, fields(repo = %hook.repo, pr = %hook.pull_request.number, action = ?hook.action))]
    pub async fn handle_pull_request(
        &self,
        config: &Config,
        hook: &PullRequestHook,
    ) -> Result<(), TriggerError> {
        let pr = &hook.pull_request;
        let policy = config.trigger_for(&hook.repo);
        match &hook.action {
            PrAction::Opened => {
                if trusted_pull_request(self.scm.as_ref(), &policy, &pr.repo, &pr.author, &pr.labels)
                    .await?
                {
                    info!("building trusted pull request");
                    self.build_all(config, pr).await
                } else {
                    info!(author = %pr.author, "welcoming untrusted author");
                    let body = welcome_message(&pr.author, &pr.repo.owner, &policy.join_org_url);
                    self.scm.create_comment(&pr.repo, pr.number, &body).await?;
                    self.scm
                        .add_label(&pr.repo, pr.number, NEEDS_OK_TO_TEST_LABEL)
                        .await?;
                    Ok(())
                }
            }
            PrAction::Reopened | PrAction::Synchronize => self.build_if_trusted(config, pr).await,
            PrAction::Edited if hook.changes.base_ref_changed || hook.changes.base_sha_changed => {
                self.build_if_trusted(config, pr).await
            }
            PrAction::Labeled => match hook.label.as_deref() {
                Some(LGTM_LABEL) | Some(UPDATEBOT_LABEL) => {
                    // A trusted PR was built when it was opened or pushed.
                    if trusted_pull_request(
                        self.scm.as_ref(),
                        &policy,
                        &pr.repo,
                        &pr.author,
                        &pr.labels,
                    )
                    .await?
                    {
                        return Ok(());
                    }
                    info!("building untrusted pull request after approval");
                    self.build_all(config, pr).await
                }
                Some(OK_TO_TEST_LABEL) => {
                    if pr.has_label(NEEDS_OK_TO_TEST_LABEL) {
                        self.scm
                            .remove_label(&pr.repo, pr.number, NEEDS_OK_TO_TEST_LABEL)
                            .await?;
                    }
                    self.build_all(config, pr).await
                }
                _ => Ok(()),
            },
            other => {
                debug!(action = ?other, "ignoring pull request action");
                Ok(())
            }
        }
    }

    async fn build_if_trusted(&self, config: &Config, pr: &PullRequest) -> Result<(), TriggerError> {
        let policy = config.trigger_for(&pr.repo);
        if !trusted_pull_request(self.scm.as_ref(), &policy, &pr.repo, &pr.author, &pr.labels).await? {
            debug!(author = %pr.author, "not building untrusted pull request");
            return Ok(());
        }
        if pr.has_label(NEEDS_OK_TO_TEST_LABEL) {
            self.scm
                .remove_label(&pr.repo, pr.number, NEEDS_OK_TO_TEST_LABEL)
                .await?;
        }
        self.build_all(config, pr).await
    }

    pub(crate) async fn build_all(&self, config: &Config, pr: &PullRequest) -> Result<(), TriggerError> {
        self.filter_and_run(config, pr, &Filter::TestAll).await?;
        Ok(())
    }
}
