use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::{ObjectMeta, Resource};

pub const SUCCEEDED_CONDITION: &str = "Succeeded";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A pipeline engine run. The spec is opaque here and copied as-is when a
/// run is retried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: PipelineRunStatus,
}

impl PipelineRun {
    pub fn pipeline_ref_name(&self) -> Option<&str> {
        self.spec
            .get("pipelineRef")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
    }

    pub fn success_condition(&self) -> Option<&Condition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == SUCCEEDED_CONDITION)
    }

    /// Failed with a message containing one of `messages`.
    pub fn failed_with_any(&self, messages: &[String]) -> bool {
        self.success_condition().is_some_and(|c| {
            c.status.eq_ignore_ascii_case("false") && messages.iter().any(|m| c.message.contains(m.as_str()))
        })
    }
}

impl Resource for PipelineRun {
    const KIND: &'static str = "pipelinerun";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
pub(crate) fn failed_run(name: &str, message: &str) -> PipelineRun {
    PipelineRun {
        metadata: ObjectMeta::new("jx", name),
        spec: serde_json::json!({"pipelineRef": {"name": "build"}, "params": [{"name": "x", "value": "1"}]}),
        status: PipelineRunStatus {
            conditions: vec![Condition {
                condition_type: SUCCEEDED_CONDITION.to_string(),
                status: "False".to_string(),
                reason: "Failed".to_string(),
                message: message.to_string(),
            }],
        },
    }
}
