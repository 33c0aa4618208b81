use std::sync::Arc;

use async_trait::async_trait;

use super::{Plugin, PluginError};
use crate::config::Config;
use crate::trigger::Trigger;
use crate::webhooks::{Webhook, WebhookKind};

/// Hands pull request, push and comment events to the trigger reconciler.
pub struct TriggerPlugin {
    trigger: Arc<Trigger>,
}

impl TriggerPlugin {
    pub fn new(trigger: Arc<Trigger>) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl Plugin for TriggerPlugin {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn handles(&self, kind: WebhookKind) -> bool {
        matches!(kind, WebhookKind::PullRequest | WebhookKind::Push) || kind.is_comment()
    }

    async fn handle(&self, config: &Config, hook: &Webhook) -> Result<(), PluginError> {
        match hook {
            Webhook::PullRequest(h) => self.trigger.handle_pull_request(config, h).await?,
            Webhook::Push(h) => self.trigger.handle_push(config, h).await?,
            other => {
                if let Some(gc) = other.generic_comment() {
                    self.trigger.handle_generic_comment(config, &gc).await?;
                }
            }
        }
        Ok(())
    }
}
