//! Webhook plugins.
//!
//! A plugin handles some webhook kinds for the repos that enable it in the
//! `plugins` config section. The registry runs every enabled plugin that
//! handles the incoming kind and reports their failures together.

mod lgtm;
mod overrides;
mod trigger;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::ClusterError;
use crate::config::Config;
use crate::scm::ScmError;
use crate::trigger::TriggerError;
use crate::webhooks::{Webhook, WebhookKind};

pub use lgtm::LgtmPlugin;
pub use overrides::{OverridePlugin, override_description};
pub use trigger::TriggerPlugin;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// The name repos use to enable this plugin.
    fn name(&self) -> &'static str;

    fn handles(&self, kind: WebhookKind) -> bool;

    async fn handle(&self, config: &Config, hook: &Webhook) -> Result<(), PluginError>;
}

/// Failures of one dispatch, one entry per failing plugin.
#[derive(Debug, Error)]
#[error("{}", self.message())]
pub struct DispatchError {
    pub failures: Vec<(&'static str, PluginError)>,
}

impl DispatchError {
    pub fn message(&self) -> String {
        self.failures
            .iter()
            .map(|(name, e)| format!("plugin {name}: {e}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Runs every enabled plugin that handles `hook`. Returns how many ran.
    pub async fn dispatch(&self, config: &Config, hook: &Webhook) -> Result<usize, DispatchError> {
        let Some(repo) = hook.repo() else {
            debug!(kind = %hook.kind(), "event has no repository");
            return Ok(0);
        };
        let enabled = config.plugins.enabled_for(repo);
        let mut ran = 0;
        let mut failures = Vec::new();
        for plugin in &self.plugins {
            if !enabled.contains(plugin.name()) || !plugin.handles(hook.kind()) {
                continue;
            }
            ran += 1;
            if let Err(e) = plugin.handle(config, hook).await {
                warn!(plugin = plugin.name(), repo = %repo, guid = hook.guid(), error = %e, "plugin failed");
                failures.push((plugin.name(), e));
            }
        }
        if failures.is_empty() {
            Ok(ran)
        } else {
            Err(DispatchError { failures })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records the events it is given and optionally fails.
    pub struct RecordingPlugin {
        pub name: &'static str,
        pub fail_with: Option<String>,
        pub seen: Mutex<Vec<String>>,
    }

    impl RecordingPlugin {
        pub fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_with: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(name: &'static str, message: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_with: Some(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Plugin for RecordingPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handles(&self, _kind: WebhookKind) -> bool {
            true
        }

        async fn handle(&self, _config: &Config, hook: &Webhook) -> Result<(), PluginError> {
            self.seen.lock().unwrap().push(hook.guid().to_string());
            match &self.fail_with {
                Some(msg) => Err(PluginError::Scm(ScmError::permanent(msg.clone()))),
                None => Ok(()),
            }
        }
    }
}
