//! Job and activity records.

pub mod activity;
pub mod job;
pub mod labels;
pub mod launcher;

pub use activity::{Activity, ActivitySpec, ActivityState, Stage, activity_description, to_job_status};
pub use job::{Job, JobSpec, JobState, JobStatus, JobType, Pull, Refs};
pub use labels::new_job;
pub use launcher::{BuildNumberLauncher, LaunchError, LaunchedPipeline, PipelineDefaults, PipelineLauncher};
