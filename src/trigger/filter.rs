//! Choosing which presubmits an event runs and which it reports as skipped.
//!
//! A [`Filter`] first decides whether a presubmit is considered at all. A
//! considered presubmit is then run or skipped according to its branch and
//! change matchers, with the filter able to force it or change the default
//! for jobs that have no change matcher.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::Presubmit;
use crate::scm::{ScmClient, ScmError};
use crate::types::{PrNumber, RepoId, Sha};

/// A filter's verdict for one presubmit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterDecision {
    pub matches: bool,
    pub forced: bool,
    pub defaults: bool,
}

#[derive(Debug, Clone)]
pub enum Filter {
    /// `/test all`, and every pull request event.
    TestAll,
    /// `/test <job>`: presubmits whose trigger matches the comment body.
    Command(String),
    /// `/retest`: contexts that failed, and contexts never reported.
    Retest {
        failed: BTreeSet<String>,
        all: BTreeSet<String>,
    },
    Union(Vec<Filter>),
}

impl Filter {
    pub fn decide(&self, presubmit: &Presubmit) -> FilterDecision {
        match self {
            Filter::TestAll => FilterDecision {
                matches: true,
                forced: false,
                defaults: false,
            },
            Filter::Command(body) => {
                let hit = presubmit.triggered_by(body);
                FilterDecision {
                    matches: hit,
                    forced: hit,
                    defaults: true,
                }
            }
            Filter::Retest { failed, all } => {
                if failed.contains(&presubmit.context) {
                    FilterDecision {
                        matches: true,
                        forced: true,
                        defaults: true,
                    }
                } else if !all.contains(&presubmit.context) {
                    FilterDecision {
                        matches: true,
                        forced: false,
                        defaults: false,
                    }
                } else {
                    FilterDecision::default()
                }
            }
            Filter::Union(filters) => filters.iter().map(|f| f.decide(presubmit)).fold(
                FilterDecision::default(),
                |acc, d| FilterDecision {
                    matches: acc.matches || d.matches,
                    forced: acc.forced || d.forced,
                    defaults: acc.defaults || d.defaults,
                },
            ),
        }
    }

    /// True if some considered presubmit needs the changed-file list to
    /// reach a verdict.
    pub fn needs_changes(&self, presubmits: &[Presubmit]) -> bool {
        presubmits.iter().any(|p| {
            let d = self.decide(p);
            d.matches && !d.forced && !p.always_run && p.changes.can_run_based_on_changes()
        })
    }
}

/// Presubmits split by what the event does with them.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub to_run: Vec<Presubmit>,
    pub to_skip: Vec<Presubmit>,
}

/// Applies `filter` to `presubmits` for a change to `branch`. Presubmits the
/// filter does not consider land in neither list.
pub fn filter_presubmits(
    filter: &Filter,
    presubmits: &[Presubmit],
    branch: &str,
    changes: &[String],
) -> Partition {
    let mut partition = Partition::default();
    for p in presubmits {
        let d = filter.decide(p);
        if !d.matches {
            continue;
        }
        if p.should_run(branch, || changes.to_vec(), d.forced, d.defaults) {
            partition.to_run.push(p.clone());
        } else {
            partition.to_skip.push(p.clone());
        }
    }
    partition
}

/// Changed-file lists per (repo, PR, head SHA). A new head SHA misses.
#[derive(Debug, Default)]
pub struct ChangeCache {
    entries: Mutex<HashMap<(RepoId, PrNumber, Sha), Arc<Vec<String>>>>,
}

impl ChangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn changes(
        &self,
        scm: &dyn ScmClient,
        repo: &RepoId,
        number: PrNumber,
        head: &Sha,
    ) -> Result<Arc<Vec<String>>, ScmError> {
        let key = (repo.clone(), number, head.clone());
        if let Some(hit) = self.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let files = Arc::new(scm.get_pull_request_changes(repo, number).await?);
        let mut entries = self.lock();
        // Older heads of this PR will not be asked for again.
        entries.retain(|(r, n, _), _| !(r == repo && *n == number));
        entries.insert(key, Arc::clone(&files));
        Ok(files)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(RepoId, PrNumber, Sha), Arc<Vec<String>>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TEST_CONFIG};
    use crate::scm::fake::FakeScmClient;

    fn presubmits() -> Vec<Presubmit> {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        config.presubmits_for(&RepoId::new("org", "repo")).to_vec()
    }

    fn names(ps: &[Presubmit]) -> Vec<&str> {
        ps.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_all_runs_always_run_and_matching_changes() {
        let ps = presubmits();
        let part = filter_presubmits(&Filter::TestAll, &ps, "master", &["src/lib.rs".to_string()]);
        assert_eq!(names(&part.to_run), vec!["foo", "bar", "baz", "flaky"]);
        assert_eq!(names(&part.to_skip), vec!["docs"]);

        let part = filter_presubmits(&Filter::TestAll, &ps, "master", &["docs/a.md".to_string()]);
        assert!(names(&part.to_run).contains(&"docs"));
        assert!(part.to_skip.is_empty());
    }

    #[test]
    fn explicit_command_forces_only_its_job() {
        let ps = presubmits();
        let part = filter_presubmits(&Filter::Command("/test docs".to_string()), &ps, "master", &[]);
        assert_eq!(names(&part.to_run), vec!["docs"]);
        assert!(part.to_skip.is_empty());
    }

    #[test]
    fn retest_picks_failed_and_missing() {
        let ps = presubmits();
        let filter = Filter::Retest {
            failed: ["bar".to_string()].into(),
            all: ["foo", "bar", "baz", "flaky"].iter().map(|s| s.to_string()).collect(),
        };
        let part = filter_presubmits(&filter, &ps, "master", &[]);
        assert_eq!(names(&part.to_run), vec!["bar"]);
        // docs was never reported but its matcher says no.
        assert_eq!(names(&part.to_skip), vec!["docs"]);
    }

    #[test]
    fn union_considers_any_member() {
        let ps = presubmits();
        let filter = Filter::Union(vec![
            Filter::Command("/test docs".to_string()),
            Filter::Retest {
                failed: ["foo".to_string()].into(),
                all: ps.iter().map(|p| p.context.clone()).collect(),
            },
        ]);
        let part = filter_presubmits(&filter, &ps, "master", &[]);
        assert_eq!(names(&part.to_run), vec!["foo", "docs"]);
    }

    #[test]
    fn changes_only_needed_for_unforced_matchers() {
        let ps = presubmits();
        assert!(Filter::TestAll.needs_changes(&ps));
        assert!(!Filter::Command("/test docs".to_string()).needs_changes(&ps));
        assert!(!Filter::Command("/test foo".to_string()).needs_changes(&ps));
    }

    #[tokio::test]
    async fn change_cache_is_keyed_by_head() {
        let scm = FakeScmClient::new("bot");
        let repo = RepoId::new("org", "repo");
        scm.set_changes(&repo, PrNumber(1), &["a.rs"]);
        let cache = ChangeCache::new();

        let first = cache.changes(&scm, &repo, PrNumber(1), &Sha::new("x")).await.unwrap();
        let again = cache.changes(&scm, &repo, PrNumber(1), &Sha::new("x")).await.unwrap();
        assert_eq!(*first, vec!["a.rs".to_string()]);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(scm.state().change_requests, 1);

        scm.set_changes(&repo, PrNumber(1), &["b.rs"]);
        let moved = cache.changes(&scm, &repo, PrNumber(1), &Sha::new("y")).await.unwrap();
        assert_eq!(*moved, vec!["b.rs".to_string()]);
        assert_eq!(scm.state().change_requests, 2);
        assert_eq!(cache.len(), 1);
    }
}
