//! Merging PRs the keeper has found green.

use tracing::{info, warn};

use super::KeeperError;
use crate::config::KeeperConfig;
use crate::scm::{ScmClient, ScmErrorKind};
use crate::types::{MergeMethod, MergeOptions, PrNumber, PullRequest};

/// The method `pr` merges with: its single method label, else the repo
/// default. Two or more method labels are an error.
pub fn merge_method(config: &KeeperConfig, pr: &PullRequest) -> Result<MergeMethod, KeeperError> {
    let methods = config.merge_labels.methods_on(pr);
    match methods.as_slice() {
        [] => Ok(config.merge_method_for(&pr.repo)),
        [one] => Ok(*one),
        _ => Err(KeeperError::ConflictingMergeMethod {
            pr: pr.number,
            methods,
        }),
    }
}

pub fn merge_title(pr: &PullRequest) -> String {
    format!("{} ({})", pr.title, pr.number)
}

/// What happened to each PR of one merge action.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub merged: Vec<PrNumber>,
    pub failures: Vec<(PrNumber, String)>,
    /// Set when a failure stopped the remaining merges.
    pub aborted: Option<String>,
}

impl MergeOutcome {
    pub fn error_message(&self) -> Option<String> {
        let mut parts: Vec<String> = self
            .failures
            .iter()
            .map(|(n, e)| format!("{n}: {e}"))
            .collect();
        if let Some(abort) = &self.aborted {
            parts.push(abort.clone());
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

fn conflicting_method_comment(pr: &PullRequest, methods: &[MergeMethod]) -> String {
    let labels: Vec<&str> = methods.iter().map(MergeMethod::as_str).collect();
    format!(
        "@{}: this PR carries more than one merge method label ({}). Remove all but one so it can merge.",
        pr.author,
        labels.join(", ")
    )
}

/// Merges `prs` in order at the head SHAs they had when the tick started.
/// Unmergeable, moved or otherwise failing PRs are skipped; an
/// authorization or merge-method refusal stops the rest.
pub async fn merge_prs(scm: &dyn ScmClient, config: &KeeperConfig, prs: &[&PullRequest]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for pr in prs {
        let method = match merge_method(config, pr) {
            Ok(method) => method,
            Err(e) => {
                warn!(pr = %pr.number, error = %e, "not merging");
                if let KeeperError::ConflictingMergeMethod { methods, .. } = &e {
                    let body = conflicting_method_comment(pr, methods);
                    if let Err(err) = scm.create_comment(&pr.repo, pr.number, &body).await {
                        warn!(pr = %pr.number, error = %err, "failed to comment on merge method conflict");
                    }
                }
                outcome.failures.push((pr.number, e.to_string()));
                continue;
            }
        };
        let options = MergeOptions {
            sha: pr.head_sha.clone(),
            method,
            title: merge_title(pr),
            body: pr.body.clone(),
        };
        match scm.merge(&pr.repo, pr.number, &options).await {
            Ok(()) => {
                info!(repo = %pr.repo, pr = %pr.number, sha = %pr.head_sha.short(), method = %method, "merged");
                outcome.merged.push(pr.number);
            }
            Err(e) if matches!(e.kind, ScmErrorKind::Unauthorized | ScmErrorKind::MergeMethodForbidden) => {
                warn!(repo = %pr.repo, pr = %pr.number, error = %e, "merge refused, stopping");
                outcome.aborted = Some(format!("{}: {e}", pr.number));
                break;
            }
            Err(e) => {
                warn!(repo = %pr.repo, pr = %pr.number, error = %e, "merge failed");
                outcome.failures.push((pr.number, e.to_string()));
            }
        }
    }
    outcome
}
