//! The label/annotation contract on job records and the `new_job` helper.
//!
//! Labels are what the activity reconciler selects on, so every ref-bearing
//! job carries org, repo, branch, context and (for presubmits) the pull
//! number. Values longer than the 63-character label cap are trimmed and the
//! full value is kept in an annotation of the same key.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::warn;

use super::job::{Job, JobSpec, JobState, JobStatus};
use crate::cluster::ObjectMeta;

pub const LABEL_PREFIX: &str = "lighthouse.jenkins-x.io/";
pub const CREATED_BY_LABEL: &str = "created-by-lighthouse";
pub const TYPE_LABEL: &str = "lighthouse.jenkins-x.io/type";
pub const JOB_LABEL: &str = "lighthouse.jenkins-x.io/job";
pub const ORG_LABEL: &str = "lighthouse.jenkins-x.io/refs.org";
pub const REPO_LABEL: &str = "lighthouse.jenkins-x.io/refs.repo";
pub const BRANCH_LABEL: &str = "lighthouse.jenkins-x.io/branch";
pub const BUILD_NUM_LABEL: &str = "lighthouse.jenkins-x.io/buildNum";
pub const CONTEXT_LABEL: &str = "lighthouse.jenkins-x.io/context";
pub const PULL_LABEL: &str = "lighthouse.jenkins-x.io/refs.pull";
pub const ID_LABEL: &str = "lighthouse.jenkins-x.io/id";

/// Maximum length of a label value.
pub const MAX_LABEL_LEN: usize = 63;

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap_or_else(|e| {
        unreachable!("label value pattern is a literal: {e}")
    })
});

pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_LEN && LABEL_VALUE.is_match(value)
}

/// Cuts `value` to the label cap and strips trailing `-`, `_` and `.`.
pub fn trim_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_LEN {
        return value;
    }
    let mut end = MAX_LABEL_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].trim_end_matches(['-', '_', '.'])
}

/// `value` as a label value: trimmed to the cap, or failing that its last
/// path segment. `None` if neither is valid.
pub fn label_value(value: &str) -> Option<String> {
    let trimmed = trim_label(value);
    if is_valid_label_value(trimmed) {
        return Some(trimmed.to_string());
    }
    let base = trim_label(value.rsplit('/').next().unwrap_or_default());
    is_valid_label_value(base).then(|| base.to_string())
}

/// The labels and annotations a job with `spec` must carry. Invalid values
/// fall back to their last path segment or are dropped.
pub fn labels_and_annotations_for_spec(
    spec: &JobSpec,
    extra_labels: &BTreeMap<String, String>,
    extra_annotations: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut candidates: Vec<(String, String)> = vec![
        (CREATED_BY_LABEL.to_string(), "true".to_string()),
        (TYPE_LABEL.to_string(), spec.job_type.as_str().to_string()),
        (JOB_LABEL.to_string(), spec.job.clone()),
    ];
    if let Some(refs) = &spec.refs {
        candidates.push((ORG_LABEL.to_string(), refs.org.clone()));
        candidates.push((REPO_LABEL.to_string(), refs.repo.clone()));
        candidates.push((CONTEXT_LABEL.to_string(), spec.context.clone()));
        if let [pull] = refs.pulls.as_slice() {
            candidates.push((PULL_LABEL.to_string(), pull.number.0.to_string()));
            candidates.push((BRANCH_LABEL.to_string(), format!("PR-{}", pull.number.0)));
        } else if refs.pulls.len() > 1 {
            candidates.push((BRANCH_LABEL.to_string(), "batch".to_string()));
        } else {
            candidates.push((BRANCH_LABEL.to_string(), refs.base_ref.clone()));
        }
    }
    candidates.extend(extra_labels.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut labels = BTreeMap::new();
    let mut annotations: BTreeMap<String, String> = extra_annotations.clone();
    for (key, value) in candidates {
        if trim_label(&value).len() != value.len() {
            annotations.insert(key.clone(), value.clone());
        }
        match label_value(&value) {
            Some(v) => {
                labels.insert(key, v);
            }
            None => warn!(label = %key, value = %value, "dropping invalid label value"),
        }
    }
    // The job name is always recoverable even when the label was trimmed.
    annotations
        .entry(JOB_LABEL.to_string())
        .or_insert_with(|| spec.job.clone());
    (labels, annotations)
}

/// Builds a fresh job record: UUID name, start time now, state triggered.
pub fn new_job(
    namespace: &str,
    spec: JobSpec,
    extra_labels: &BTreeMap<String, String>,
    extra_annotations: &BTreeMap<String, String>,
) -> Job {
    let name = uuid::Uuid::new_v4().to_string();
    let (mut labels, annotations) = labels_and_annotations_for_spec(&spec, extra_labels, extra_annotations);
    labels.insert(ID_LABEL.to_string(), name.clone());
    Job {
        metadata: ObjectMeta {
            name,
            namespace: namespace.to_string(),
            labels,
            annotations,
            resource_version: 0,
        },
        spec,
        status: JobStatus {
            state: JobState::Triggered,
            start_time: Utc::now(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::test_job;
    use proptest::prelude::*;

    #[test]
    fn presubmit_labels() {
        let job = test_job("x", "unit-tests", 7, "abc", JobState::Triggered);
        let (labels, annotations) =
            labels_and_annotations_for_spec(&job.spec, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(labels[CREATED_BY_LABEL], "true");
        assert_eq!(labels[TYPE_LABEL], "presubmit");
        assert_eq!(labels[JOB_LABEL], "unit-tests");
        assert_eq!(labels[ORG_LABEL], "org");
        assert_eq!(labels[REPO_LABEL], "repo");
        assert_eq!(labels[BRANCH_LABEL], "PR-7");
        assert_eq!(labels[PULL_LABEL], "7");
        assert_eq!(labels[CONTEXT_LABEL], "unit-tests");
        assert_eq!(annotations[JOB_LABEL], "unit-tests");
    }

    #[test]
    fn long_values_are_trimmed_with_full_annotation() {
        let mut job = test_job("x", "j", 7, "abc", JobState::Triggered);
        let long = format!("{}-.{}", "a".repeat(61), "b".repeat(20));
        job.spec.job = long.clone();
        let (labels, annotations) =
            labels_and_annotations_for_spec(&job.spec, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(labels[JOB_LABEL], "a".repeat(61));
        assert_eq!(annotations[JOB_LABEL], long);
    }

    #[test]
    fn invalid_values_fall_back_to_basename() {
        let mut job = test_job("x", "j", 7, "abc", JobState::Triggered);
        job.spec.context = "ci/lint".to_string();
        let (labels, _) =
            labels_and_annotations_for_spec(&job.spec, &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(labels[CONTEXT_LABEL], "lint");

        job.spec.context = "ci/ lint!".to_string();
        let (labels, _) =
            labels_and_annotations_for_spec(&job.spec, &BTreeMap::new(), &BTreeMap::new());
        assert!(!labels.contains_key(CONTEXT_LABEL));
    }

    #[test]
    fn new_job_is_triggered_with_uuid_name() {
        let spec = test_job("x", "unit", 7, "abc", JobState::Success).spec;
        let a = new_job("jx", spec.clone(), &BTreeMap::new(), &BTreeMap::new());
        let b = new_job("jx", spec, &BTreeMap::new(), &BTreeMap::new());
        assert_ne!(a.metadata.name, b.metadata.name);
        assert_eq!(a.status.state, JobState::Triggered);
        assert_eq!(a.metadata.labels[ID_LABEL], a.metadata.name);
        assert_eq!(a.metadata.namespace, "jx");
    }

    proptest! {
        #[test]
        fn trimmed_labels_fit_the_cap(s in "[a-z0-9._-]{0,120}") {
            let t = trim_label(&s);
            prop_assert!(t.len() <= MAX_LABEL_LEN);
            prop_assert!(s.starts_with(t));
        }
    }
}
