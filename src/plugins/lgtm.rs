use async_trait::async_trait;
use tracing::{debug, info};

use super::{Plugin, PluginError};
use crate::commands::{Command, parse_commands};
use crate::config::Config;
use crate::scm::SharedScmClient;
use crate::trigger::{LGTM_LABEL, trusted_user};
use crate::webhooks::{CommentAction, GenericComment, Webhook, WebhookKind};

/// `/lgtm` and `/lgtm cancel`.
pub struct LgtmPlugin {
    scm: SharedScmClient,
}

impl LgtmPlugin {
    pub fn new(scm: SharedScmClient) -> Self {
        Self { scm }
    }

    async fn handle_comment(&self, config: &Config, gc: &GenericComment) -> Result<(), PluginError> {
        if !gc.is_pr || gc.action != CommentAction::Created || !gc.is_open() {
            return Ok(());
        }
        let commands = parse_commands(&gc.body);
        let wants_lgtm = commands.contains(&Command::Lgtm);
        let wants_cancel = commands.contains(&Command::LgtmCancel);
        if !wants_lgtm && !wants_cancel {
            return Ok(());
        }

        let policy = config.trigger_for(&gc.repo);
        if !trusted_user(self.scm.as_ref(), &policy, &gc.repo, &gc.author).await? {
            debug!(author = %gc.author, "ignoring lgtm from untrusted user");
            return Ok(());
        }
        let has_label = gc.labels.iter().any(|l| l == LGTM_LABEL);

        if wants_cancel {
            if has_label {
                info!(repo = %gc.repo, pr = %gc.number, author = %gc.author, "removing lgtm");
                self.scm.remove_label(&gc.repo, gc.number, LGTM_LABEL).await?;
            }
            return Ok(());
        }

        if gc.author == gc.issue_author {
            let body = format!("@{}: you cannot LGTM your own PR.", gc.author);
            self.scm.create_comment(&gc.repo, gc.number, &body).await?;
            return Ok(());
        }
        if !has_label {
            info!(repo = %gc.repo, pr = %gc.number, author = %gc.author, "adding lgtm");
            self.scm.add_label(&gc.repo, gc.number, LGTM_LABEL).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for LgtmPlugin {
    fn name(&self) -> &'static str {
        "lgtm"
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
    use std::sync::Arc;

    use super::*;
    use crate::scm::fake::FakeScmClient;
    use crate::types::pr::test_pr;
    use crate::types::{PrNumber, RepoId};

    fn comment(author: &str, body: &str, labels: &[&str]) -> GenericComment {
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
            number: PrNumber(1),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            head_sha: None,
            guid: "g".to_string(),
        }
    }

    fn setup() -> (Arc<FakeScmClient>, LgtmPlugin) {
        let scm = Arc::new(FakeScmClient::new("bot"));
        scm.add_pr(test_pr(1, "x"));
        scm.add_member("org", "alice");
        scm.add_member("org", "author");
        (scm.clone(), LgtmPlugin::new(scm))
    }

    #[tokio::test]
    async fn reviewer_lgtm_adds_label() {
        let (scm, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("alice", "/lgtm", &[]))
            .await
            .unwrap();
        assert_eq!(scm.labels(&RepoId::new("org", "repo"), PrNumber(1)), vec![LGTM_LABEL]);
    }

    #[tokio::test]
    async fn author_cannot_lgtm_but_can_cancel() {
        let (scm, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("author", "/lgtm", &[]))
            .await
            .unwrap();
        assert!(scm.state().added_labels.is_empty());
        assert!(scm.created_comments()[0].contains("cannot LGTM your own PR"));

        plugin
            .handle_comment(&Config::default(), &comment("author", "/lgtm cancel", &[LGTM_LABEL]))
            .await
            .unwrap();
        assert_eq!(scm.state().removed_labels.len(), 1);
    }

    #[tokio::test]
    async fn untrusted_users_are_ignored() {
        let (scm, plugin) = setup();
        plugin
            .handle_comment(&Config::default(), &comment("mallory", "/lgtm", &[]))
            .await
            .unwrap();
        assert!(scm.state().added_labels.is_empty());
        assert!(scm.created_comments().is_empty());
    }
}
