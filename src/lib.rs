//! Lighthouse: a chat-ops and merge-automation controller for pull requests.
//!
//! Webhook deliveries drive the plugins (`/test`, `/lgtm`, `/override`), which
//! create job records; the job controller mirrors pipeline activities back
//! onto those jobs and reports them as commit statuses; the keeper merges
//! PRs whose required contexts are green, batching them when it can.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod controller;
pub mod jobs;
pub mod keeper;
pub mod plugins;
pub mod queue;
pub mod retrier;
pub mod scm;
pub mod server;
pub mod settings;
pub mod trigger;
pub mod types;
pub mod webhooks;
