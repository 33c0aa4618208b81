//! Job records: a request to run one CI job against one set of refs, plus its
//! observed status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{ObjectMeta, Resource};
use crate::types::{PrNumber, RepoId, Sha};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Presubmit,
    Postsubmit,
    Periodic,
    Batch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Presubmit => "presubmit",
            JobType::Postsubmit => "postsubmit",
            JobType::Periodic => "periodic",
            JobType::Batch => "batch",
        }
    }
}

/// Job lifecycle. Moves forward only:
/// triggered → pending → running → success | failure | error | aborted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Triggered,
    Pending,
    Running,
    Success,
    Failure,
    Aborted,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Triggered => "triggered",
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failure => "failure",
            JobState::Aborted => "aborted",
            JobState::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Triggered | JobState::Pending | JobState::Running)
    }

    pub fn is_complete(&self) -> bool {
        !self.is_active()
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Triggered => 0,
            JobState::Pending => 1,
            JobState::Running => 2,
            _ => 3,
        }
    }

    /// True if moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_complete() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pull request included in a job's refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pull {
    pub number: PrNumber,
    pub author: String,
    pub sha: Sha,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub link: String,
}

/// The code a job runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refs {
    pub org: String,
    pub repo: String,
    pub base_ref: String,
    pub base_sha: Sha,
    #[serde(default)]
    pub base_link: String,
    #[serde(default)]
    pub clone_uri: String,
    #[serde(default)]
    pub pulls: Vec<Pull>,
}

impl Refs {
    pub fn repo_id(&self) -> RepoId {
        RepoId::new(&self.org, &self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Configured job name.
    pub job: String,
    /// Status context the job reports under.
    pub context: String,
    #[serde(default)]
    pub refs: Option<Refs>,
    #[serde(default)]
    pub rerun_command: String,
    #[serde(default)]
    pub skip_report: bool,
    #[serde(default)]
    pub max_concurrency: u32,
    #[serde(default)]
    pub decorate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activity_name: String,
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub last_commit_sha: Option<Sha>,
    /// Job state at the last status report to the host.
    #[serde(default)]
    pub last_reported_state: Option<JobState>,
    #[serde(default)]
    pub last_reported_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    pub status: JobStatus,
}

impl Resource for Job {
    const KIND: &'static str = "job";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Job {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_active(&self) -> bool {
        self.status.state.is_active()
    }

    pub fn is_batch(&self) -> bool {
        self.spec.job_type == JobType::Batch
            || self.spec.refs.as_ref().is_some_and(|r| r.pulls.len() > 1)
    }

    /// Head SHA of the single pull a presubmit runs against.
    pub fn head_sha(&self) -> Option<&Sha> {
        match self.spec.refs.as_ref()?.pulls.as_slice() {
            [pull] => Some(&pull.sha),
            _ => None,
        }
    }

    /// Number of the single pull a presubmit runs against.
    pub fn pull_number(&self) -> Option<PrNumber> {
        match self.spec.refs.as_ref()?.pulls.as_slice() {
            [pull] => Some(pull.number),
            _ => None,
        }
    }

    pub fn base_sha(&self) -> Option<&Sha> {
        self.spec.refs.as_ref().map(|r| &r.base_sha)
    }

    pub fn repo_id(&self) -> Option<RepoId> {
        self.spec.refs.as_ref().map(Refs::repo_id)
    }

    /// The SHA statuses are reported against: the pull head for presubmits,
    /// the base SHA otherwise.
    pub fn report_sha(&self) -> Option<&Sha> {
        let refs = self.spec.refs.as_ref()?;
        match refs.pulls.as_slice() {
            [pull] => Some(&pull.sha),
            [] => Some(&refs.base_sha),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_job(name: &str, job: &str, number: u64, sha: &str, state: JobState) -> Job {
    Job {
        metadata: ObjectMeta::new("jx", name),
        spec: JobSpec {
            job_type: JobType::Presubmit,
            job: job.to_string(),
            context: job.to_string(),
            refs: Some(Refs {
                org: "org".to_string(),
                repo: "repo".to_string(),
                base_ref: "master".to_string(),
                base_sha: Sha::new("base"),
                base_link: String::new(),
                clone_uri: String::new(),
                pulls: vec![Pull {
                    number: PrNumber(number),
                    author: "author".to_string(),
                    sha: Sha::new(sha),
                    title: String::new(),
                    ref_name: String::new(),
                    link: String::new(),
                }],
            }),
            rerun_command: format!("/test {job}"),
            skip_report: false,
            max_concurrency: 0,
            decorate: false,
        },
        status: JobStatus {
            state,
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        use JobState::*;
        assert!(Triggered.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Running));
        assert!(Triggered.can_transition_to(Success));
        assert!(Running.can_transition_to(Aborted));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Failure));
        assert!(Success.can_transition_to(Success));
    }

    #[test]
    fn presubmit_accessors() {
        let job = test_job("j1", "unit", 4, "abc", JobState::Pending);
        assert!(job.is_active());
        assert!(!job.is_batch());
        assert_eq!(job.head_sha(), Some(&Sha::new("abc")));
        assert_eq!(job.pull_number(), Some(PrNumber(4)));
        assert_eq!(job.report_sha(), Some(&Sha::new("abc")));
        assert_eq!(job.repo_id(), Some(RepoId::new("org", "repo")));
    }

    #[test]
    fn batch_has_no_single_head() {
        let mut job = test_job("j1", "unit", 4, "abc", JobState::Pending);
        let mut second = job.spec.refs.as_ref().unwrap().pulls[0].clone();
        second.number = PrNumber(5);
        job.spec.refs.as_mut().unwrap().pulls.push(second);
        assert!(job.is_batch());
        assert_eq!(job.head_sha(), None);
        assert_eq!(job.report_sha(), None);
    }

    #[test]
    fn serializes_type_field() {
        let job = test_job("j1", "unit", 4, "abc", JobState::Success);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["spec"]["type"], "presubmit");
        assert_eq!(json["status"]["state"], "success");
        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
