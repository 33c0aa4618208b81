use tracing::{debug, info, instrument};

use super::{Trigger, TriggerError};
use crate::config::Config;
use crate::webhooks::PushHook;

impl Trigger {
    /// Runs the postsubmits that apply to a branch push.
    #[instrument(skip_all, fields(repo = %hook.repo, git_ref = %hook.ref_name))]
    pub async fn handle_push(&self, config: &Config, hook: &PushHook) -> Result<(), TriggerError> {
        if hook.deleted {
            debug!("ignoring branch deletion");
            return Ok(());
        }
        let Some(branch) = hook.branch() else {
            debug!("ignoring push to a non-branch ref");
            return Ok(());
        };
        let changes = hook.changed_files();
        let started = self
            .run_postsubmits(config, &hook.repo, branch, &hook.after, &changes)
            .await?;
        if !started.is_empty() {
            info!(branch, count = started.len(), "started postsubmits");
        }
        Ok(())
    }
}
