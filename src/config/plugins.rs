//! Plugin enablement and trigger trust policy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::RepoId;

/// Plugin names enabled per `org` or `org/repo`. A repo gets the union of
/// both entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginsConfig(pub BTreeMap<String, Vec<String>>);

impl PluginsConfig {
    pub fn enabled_for(&self, repo: &RepoId) -> BTreeSet<String> {
        [repo.owner.clone(), repo.full_name()]
            .iter()
            .filter_map(|k| self.0.get(k))
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPolicy {
    /// `org` or `org/repo` entries this policy applies to.
    pub repos: Vec<String>,
    /// Members of this org are trusted in addition to the repo's own org.
    pub trusted_org: String,
    /// Linked from the welcome comment on untrusted PRs.
    pub join_org_url: String,
    /// Collaborators who are not org members are not trusted.
    pub only_org_members: bool,
    /// `/ok-to-test` is not honoured.
    pub ignore_ok_to_test: bool,
    /// Jobs that are skipped get no status at all.
    pub elide_skipped_contexts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggersConfig(pub Vec<TriggerPolicy>);

impl TriggersConfig {
    /// The policy for `repo`: an exact repo entry beats an org entry, and an
    /// unconfigured repo gets the default policy.
    pub fn for_repo(&self, repo: &RepoId) -> TriggerPolicy {
        let full = repo.full_name();
        self.0
            .iter()
            .find(|t| t.repos.iter().any(|r| *r == full))
            .or_else(|| self.0.iter().find(|t| t.repos.iter().any(|r| *r == repo.owner)))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugins_union_org_and_repo() {
        let cfg: PluginsConfig =
            serde_yaml::from_str("org: [trigger]\norg/repo: [lgtm, trigger]\n").unwrap();
        let enabled = cfg.enabled_for(&RepoId::new("org", "repo"));
        assert_eq!(enabled.into_iter().collect::<Vec<_>>(), vec!["lgtm", "trigger"]);
        assert!(cfg.enabled_for(&RepoId::new("other", "x")).is_empty());
    }

    #[test]
    fn repo_policy_beats_org_policy() {
        let cfg: TriggersConfig = serde_yaml::from_str(
            "- repos: [org]\n  trusted_org: friends\n- repos: [org/special]\n  only_org_members: true\n",
        )
        .unwrap();
        let special = cfg.for_repo(&RepoId::new("org", "special"));
        assert!(special.only_org_members);
        assert_eq!(special.trusted_org, "");
        assert_eq!(cfg.for_repo(&RepoId::new("org", "x")).trusted_org, "friends");
        assert_eq!(cfg.for_repo(&RepoId::new("y", "x")), TriggerPolicy::default());
    }
}
