//! Pipeline activity records and their translation onto job status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{JobState, JobStatus};
use super::labels::MAX_LABEL_LEN;
use crate::cluster::{ObjectMeta, Resource};
use crate::types::Sha;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    #[serde(rename = "none")]
    Unset,
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    Aborted,
}

impl ActivityState {
    pub fn to_job_state(self) -> JobState {
        match self {
            ActivityState::Unset | ActivityState::Pending => JobState::Pending,
            ActivityState::Running => JobState::Running,
            ActivityState::Succeeded => JobState::Success,
            ActivityState::Failed | ActivityState::Error => JobState::Failure,
            ActivityState::Aborted => JobState::Aborted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub status: ActivityState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub build: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub status: ActivityState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_commit_sha: Option<Sha>,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub build_url: String,
}

/// A live pipeline execution as reported by the pipeline engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub metadata: ObjectMeta,
    pub spec: ActivitySpec,
}

impl Resource for Activity {
    const KIND: &'static str = "activity";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Human-readable summary of where the pipeline is.
pub fn activity_description(spec: &ActivitySpec) -> String {
    let running: Vec<&str> = spec
        .stages
        .iter()
        .filter(|s| s.status == ActivityState::Running)
        .map(|s| s.name.as_str())
        .collect();
    if !running.is_empty() {
        let mut desc = format!("Pipeline running stage(s): {}", running.join(", "));
        if desc.len() > MAX_LABEL_LEN {
            let mut end = MAX_LABEL_LEN;
            while !desc.is_char_boundary(end) {
                end -= 1;
            }
            desc.truncate(end);
        }
        return desc;
    }
    match spec.status.to_job_state() {
        JobState::Success => "Pipeline successful".to_string(),
        JobState::Failure | JobState::Error | JobState::Aborted => "Pipeline failed".to_string(),
        _ => "Pipeline pending".to_string(),
    }
}

/// The job status `activity` implies, starting from `current`. Fields the
/// activity knows nothing about (start time, report bookkeeping) are kept.
pub fn to_job_status(activity: &Activity, current: &JobStatus) -> JobStatus {
    let spec = &activity.spec;
    let state = spec.status.to_job_state();
    let mut next = current.clone();
    next.state = state;
    next.description = activity_description(spec);
    next.activity_name = activity.metadata.name.clone();
    next.build_id = spec.build.clone();
    if !spec.build_url.is_empty() {
        next.url = spec.build_url.clone();
    }
    if spec.last_commit_sha.is_some() {
        next.last_commit_sha = spec.last_commit_sha.clone();
    }
    if state.is_complete() {
        next.completion_time = spec.completed_at.or(current.completion_time);
    }
    next
}

#[cfg(test)]
pub(crate) fn test_activity(name: &str, build: &str, state: ActivityState) -> Activity {
    Activity {
        metadata: ObjectMeta::new("jx", name),
        spec: ActivitySpec {
            owner: "org".to_string(),
            repo: "repo".to_string(),
            branch: "PR-7".to_string(),
            build: build.to_string(),
            context: "unit".to_string(),
            status: state,
            ..Default::default()
        },
    }
}
