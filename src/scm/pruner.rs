//! Bot comment pruning.
//!
//! One `CommentPruner` is created per PR per event. The first call lists the
//! PR's comments; later calls reuse that listing with already-deleted
//! comments hidden, so several plugins can prune without re-listing.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ScmClient;
use super::error::ScmError;
use crate::types::{Comment, PrNumber, RepoId};

pub struct CommentPruner {
    client: Arc<dyn ScmClient>,
    repo: RepoId,
    number: PrNumber,
    comments: Mutex<Option<Vec<Comment>>>,
}

impl CommentPruner {
    pub fn new(client: Arc<dyn ScmClient>, repo: RepoId, number: PrNumber) -> Self {
        Self {
            client,
            repo,
            number,
            comments: Mutex::new(None),
        }
    }

    /// Deletes every bot-authored comment matching `should_prune`. Returns the
    /// number deleted.
    pub async fn prune_comments<F>(&self, should_prune: F) -> Result<usize, ScmError>
    where
        F: Fn(&Comment) -> bool,
    {
        let mut cached = self.comments.lock().await;
        if cached.is_none() {
            let listed = self.client.list_issue_comments(&self.repo, self.number).await?;
            *cached = Some(listed);
        }
        let Some(comments) = cached.as_mut() else {
            return Ok(0);
        };

        let bot = self.client.bot_name();
        let (doomed, kept): (Vec<Comment>, Vec<Comment>) = comments
            .drain(..)
            .partition(|c| c.author == bot && should_prune(c));
        *comments = kept;

        let mut deleted = 0;
        for comment in &doomed {
            match self.client.delete_comment(&self.repo, comment.id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(repo = %self.repo, pr = %self.number, comment = %comment.id, error = %e, "failed to delete comment"),
            }
        }
        if deleted > 0 {
            debug!(repo = %self.repo, pr = %self.number, deleted, "pruned bot comments");
        }
        Ok(deleted)
    }
}
