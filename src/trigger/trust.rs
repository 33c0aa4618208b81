//! Who may cause CI to run.

use tracing::debug;

use crate::config::TriggerPolicy;
use crate::scm::{ScmClient, ScmError};
use crate::types::RepoId;

pub const OK_TO_TEST_LABEL: &str = "ok-to-test";
pub const NEEDS_OK_TO_TEST_LABEL: &str = "needs-ok-to-test";
pub const LGTM_LABEL: &str = "lgtm";
pub const UPDATEBOT_LABEL: &str = "updatebot";

/// A user is trusted if they are the bot, a collaborator (unless the policy
/// restricts trust to org members), a member of the repo's org, or a member
/// of the policy's trusted org.
pub async fn trusted_user(
    scm: &dyn ScmClient,
    policy: &TriggerPolicy,
    repo: &RepoId,
    user: &str,
) -> Result<bool, ScmError> {
    if user == scm.bot_name() {
        return Ok(true);
    }
    if !policy.only_org_members && scm.is_collaborator(repo, user).await? {
        return Ok(true);
    }
    if scm.is_member(&repo.owner, user).await? {
        return Ok(true);
    }
    if !policy.trusted_org.is_empty() && policy.trusted_org != repo.owner {
        return scm.is_member(&policy.trusted_org, user).await;
    }
    debug!(repo = %repo, user, "user is not trusted");
    Ok(false)
}

/// A pull request is trusted if its author is, or if it carries the
/// `ok-to-test` label.
pub async fn trusted_pull_request(
    scm: &dyn ScmClient,
    policy: &TriggerPolicy,
    repo: &RepoId,
    author: &str,
    labels: &[String],
) -> Result<bool, ScmError> {
    if trusted_user(scm, policy, repo, author).await? {
        return Ok(true);
    }
    Ok(labels.iter().any(|l| l == OK_TO_TEST_LABEL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::fake::FakeScmClient;

    fn repo() -> RepoId {
        RepoId::new("org", "repo")
    }

    #[tokio::test]
    async fn bot_and_org_members_are_trusted() {
        let scm = FakeScmClient::new("bot");
        scm.add_member("org", "alice");
        let policy = TriggerPolicy::default();
        assert!(trusted_user(&scm, &policy, &repo(), "bot").await.unwrap());
        assert!(trusted_user(&scm, &policy, &repo(), "alice").await.unwrap());
        assert!(!trusted_user(&scm, &policy, &repo(), "mallory").await.unwrap());
    }

    #[tokio::test]
    async fn collaborators_only_count_without_org_restriction() {
        let scm = FakeScmClient::new("bot");
        scm.add_collaborator("carol");
        let open = TriggerPolicy::default();
        let strict = TriggerPolicy {
            only_org_members: true,
            ..Default::default()
        };
        assert!(trusted_user(&scm, &open, &repo(), "carol").await.unwrap());
        assert!(!trusted_user(&scm, &strict, &repo(), "carol").await.unwrap());
    }

    #[tokio::test]
    async fn trusted_org_extends_trust() {
        let scm = FakeScmClient::new("bot");
        scm.add_member("friends", "dave");
        let policy = TriggerPolicy {
            trusted_org: "friends".to_string(),
            ..Default::default()
        };
        assert!(trusted_user(&scm, &policy, &repo(), "dave").await.unwrap());
        assert!(!trusted_user(&scm, &TriggerPolicy::default(), &repo(), "dave").await.unwrap());
    }

    #[tokio::test]
    async fn ok_to_test_label_trusts_the_pull_request() {
        let scm = FakeScmClient::new("bot");
        let policy = TriggerPolicy::default();
        let labelled = vec![OK_TO_TEST_LABEL.to_string()];
        assert!(trusted_pull_request(&scm, &policy, &repo(), "mallory", &labelled).await.unwrap());
        assert!(!trusted_pull_request(&scm, &policy, &repo(), "mallory", &[]).await.unwrap());
    }
}
