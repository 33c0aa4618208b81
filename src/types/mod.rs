//! Core domain types shared across the controllers.

pub mod ids;
pub mod pr;

pub use ids::{CommentId, PrNumber, RepoId, Sha};
pub use pr::{
    Comment, MergeMethod, MergeOptions, MergeableState, PullRequest, StatusContext, StatusInput,
    StatusState,
};
