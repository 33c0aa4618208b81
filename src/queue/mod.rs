//! Work queue feeding the reconcilers.

pub mod rate_limiter;
pub mod work_queue;

pub use rate_limiter::{RateLimiter, default_controller_rate_limiter};
pub use work_queue::WorkQueue;
