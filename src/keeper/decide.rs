use std::collections::{BTreeMap, BTreeSet};

use super::accumulate::Accumulated;
use super::pool::Action;
use crate::types::PrNumber;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Wait,
    Merge(PrNumber),
    MergeBatch(Vec<PrNumber>),
    TriggerBatch(Vec<PrNumber>),
    /// Missing presubmit names per PR, run serially.
    Trigger(BTreeMap<PrNumber, Vec<String>>),
}

impl Decision {
    pub fn action(&self) -> Action {
        match self {
            Decision::Wait => Action::Wait,
            Decision::Merge(_) => Action::Merge,
            Decision::MergeBatch(_) => Action::MergeBatch,
            Decision::TriggerBatch(_) => Action::TriggerBatch,
            Decision::Trigger(_) => Action::Trigger,
        }
    }

    pub fn targets(&self) -> Vec<PrNumber> {
        match self {
            Decision::Wait => Vec::new(),
            Decision::Merge(n) => vec![*n],
            Decision::MergeBatch(ns) | Decision::TriggerBatch(ns) => ns.clone(),
            Decision::Trigger(missing) => missing.keys().copied().collect(),
        }
    }
}

/// Picks PRs to test together: in number order, starting from the first,
/// each PR that shares a missing test with those already picked, up to
/// `limit`.
pub fn pick_batch(missing_tests: &BTreeMap<PrNumber, Vec<String>>, limit: usize) -> Vec<PrNumber> {
    let mut picked = Vec::new();
    let mut union: BTreeSet<&str> = BTreeSet::new();
    for (number, tests) in missing_tests {
        if picked.len() >= limit {
            break;
        }
        if picked.is_empty() || tests.iter().any(|t| union.contains(t.as_str())) {
            picked.push(*number);
            union.extend(tests.iter().map(String::as_str));
        }
    }
    picked
}

/// Chooses this tick's action. `batch_limit` is `None` when batching is off.
pub fn decide(acc: &Accumulated, batch_limit: Option<usize>) -> Decision {
    if let Some(batch) = acc
        .batch_success
        .iter()
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
    {
        return Decision::MergeBatch(batch.clone());
    }
    if let Some(first) = acc.success.first() {
        return Decision::Merge(*first);
    }
    if let Some(limit) = batch_limit {
        if acc.batch_pending.is_empty() && acc.pending.is_empty() && acc.missing.len() >= 2 {
            let picked = pick_batch(&acc.missing_tests, limit);
            if picked.len() >= 2 {
                return Decision::TriggerBatch(picked);
            }
        }
    }
    if acc.missing.is_empty() {
        return Decision::Wait;
    }
    Decision::Trigger(
        acc.missing_tests
            .iter()
            .filter(|(n, _)| acc.missing.contains(n))
            .map(|(n, tests)| (*n, tests.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing(entries: &[(u64, &[&str])]) -> Accumulated {
        let mut acc = Accumulated::default();
        for (n, tests) in entries {
            acc.missing.insert(PrNumber(*n));
            acc.missing_tests
                .insert(PrNumber(*n), tests.iter().map(|t| t.to_string()).collect());
        }
        acc
    }

    #[test]
    fn batch_merge_beats_serial_merge() {
        let mut acc = Accumulated::default();
        acc.success.insert(PrNumber(9));
        acc.batch_success = vec![vec![PrNumber(3)], vec![PrNumber(1), PrNumber(2)]];
        assert_eq!(decide(&acc, Some(5)), Decision::MergeBatch(vec![PrNumber(1), PrNumber(2)]));
    }

    #[test]
    fn lowest_success_merges_first() {
        let mut acc = missing(&[(1, &["foo"])]);
        acc.success.extend([PrNumber(7), PrNumber(4)]);
        assert_eq!(decide(&acc, Some(5)), Decision::Merge(PrNumber(4)));
    }

    #[test]
    fn overlapping_missing_tests_batch() {
        let acc = missing(&[(1, &["foo", "bar"]), (2, &["bar"]), (3, &["docs"])]);
        assert_eq!(
            decide(&acc, Some(5)),
            Decision::TriggerBatch(vec![PrNumber(1), PrNumber(2)])
        );
    }

    #[test]
    fn pending_work_prefers_serial_triggers() {
        let mut acc = missing(&[(1, &["foo"]), (2, &["foo"])]);
        acc.batch_pending.insert(PrNumber(5));
        let Decision::Trigger(runs) = decide(&acc, Some(5)) else {
            panic!("expected serial triggers");
        };
        assert_eq!(runs.len(), 2);

        let mut acc = missing(&[(1, &["foo"]), (2, &["foo"])]);
        acc.pending.insert(PrNumber(3));
        assert!(matches!(decide(&acc, Some(5)), Decision::Trigger(_)));
    }

    #[test]
    fn disabled_or_tiny_batches_fall_back_to_trigger() {
        let acc = missing(&[(1, &["foo"]), (2, &["foo"])]);
        assert!(matches!(decide(&acc, None), Decision::Trigger(_)));
        assert!(matches!(decide(&acc, Some(1)), Decision::Trigger(_)));
        let disjoint = missing(&[(1, &["foo"]), (2, &["bar"])]);
        assert!(matches!(decide(&disjoint, Some(5)), Decision::Trigger(_)));
    }

    #[test]
    fn nothing_to_do_waits() {
        let mut acc = Accumulated::default();
        acc.pending.insert(PrNumber(1));
        assert_eq!(decide(&acc, Some(5)), Decision::Wait);
        assert_eq!(decide(&Accumulated::default(), Some(5)), Decision::Wait);
    }

    #[test]
    fn pick_batch_respects_limit() {
        let tests: BTreeMap<PrNumber, Vec<String>> = (1..=6)
            .map(|n| (PrNumber(n), vec!["foo".to_string()]))
            .collect();
        assert_eq!(pick_batch(&tests, 3), vec![PrNumber(1), PrNumber(2), PrNumber(3)]);
        assert_eq!(pick_batch(&tests, usize::MAX).len(), 6);
    }
}
