//! Sorting a subpool's PRs by the state of their required jobs.

use std::collections::{BTreeMap, BTreeSet};

use super::pool::Subpool;
use crate::jobs::{Job, JobState};
use crate::types::PrNumber;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulated {
    pub success: BTreeSet<PrNumber>,
    pub pending: BTreeSet<PrNumber>,
    pub missing: BTreeSet<PrNumber>,
    /// Presubmit names each missing PR still has to pass serially.
    pub missing_tests: BTreeMap<PrNumber, Vec<String>>,
    /// PR sets a finished, all-green batch covers at their current heads.
    pub batch_success: Vec<Vec<PrNumber>>,
    /// PRs covered by a batch that is still running.
    pub batch_pending: BTreeSet<PrNumber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Pending,
    Failed,
}

fn outcome(job: Option<&Job>) -> Outcome {
    match job.map(|j| j.status.state) {
        Some(JobState::Success) => Outcome::Success,
        Some(s) if s.is_active() => Outcome::Pending,
        _ => Outcome::Failed,
    }
}

/// The most recently started job; only it counts.
fn latest<'a>(jobs: impl Iterator<Item = &'a Job>) -> Option<&'a Job> {
    jobs.max_by(|a, b| {
        a.status
            .start_time
            .cmp(&b.status.start_time)
            .then_with(|| a.metadata.resource_version.cmp(&b.metadata.resource_version))
    })
}

pub fn accumulate(sp: &Subpool) -> Accumulated {
    let mut acc = Accumulated::default();
    accumulate_serial(sp, &mut acc);
    accumulate_batches(sp, &mut acc);
    acc
}

fn accumulate_serial(sp: &Subpool, acc: &mut Accumulated) {
    for pr in &sp.prs {
        let required = sp.presubmits.get(&pr.number).map(Vec::as_slice).unwrap_or_default();
        let mut any_pending = false;
        let mut missing = Vec::new();
        for p in required {
            let job = latest(sp.jobs.iter().filter(|j| {
                !j.is_batch()
                    && j.spec.job == p.name
                    && j.pull_number() == Some(pr.number)
                    && j.head_sha() == Some(&pr.head_sha)
            }));
            match outcome(job) {
                Outcome::Success => {}
                Outcome::Pending => any_pending = true,
                Outcome::Failed => missing.push(p.name.clone()),
            }
        }
        if !any_pending && missing.is_empty() {
            acc.success.insert(pr.number);
        } else if any_pending {
            acc.pending.insert(pr.number);
        } else {
            acc.missing.insert(pr.number);
            acc.missing_tests.insert(pr.number, missing);
        }
    }
}

fn accumulate_batches(sp: &Subpool, acc: &mut Accumulated) {
    // Batch jobs against the current base whose every pull is still at its
    // PR's head, grouped by the PRs they cover.
    let mut batches: BTreeMap<Vec<PrNumber>, Vec<&Job>> = BTreeMap::new();
    for job in sp.jobs.iter().filter(|j| j.is_batch()) {
        let Some(refs) = job.spec.refs.as_ref() else {
            continue;
        };
        if refs.base_sha != sp.base_sha {
            continue;
        }
        let current = refs
            .pulls
            .iter()
            .all(|pull| sp.pr(pull.number).is_some_and(|pr| pr.head_sha == pull.sha));
        if !current {
            continue;
        }
        let mut numbers: Vec<PrNumber> = refs.pulls.iter().map(|p| p.number).collect();
        numbers.sort();
        numbers.dedup();
        batches.entry(numbers).or_default().push(job);
    }

    for (numbers, jobs) in batches {
        let required: BTreeSet<&str> = numbers
            .iter()
            .filter_map(|n| sp.presubmits.get(n))
            .flatten()
            .map(|p| p.name.as_str())
            .collect();
        let outcomes: Vec<Outcome> = required
            .iter()
            .map(|name| outcome(latest(jobs.iter().copied().filter(|j| j.spec.job == *name))))
            .collect();
        if outcomes.contains(&Outcome::Pending) {
            acc.batch_pending.extend(numbers);
        } else if outcomes.iter().all(|o| *o == Outcome::Success) {
            acc.batch_success.push(numbers);
        }
    }
}
