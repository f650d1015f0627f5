//! Run state and results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::WorkflowError;

/// Values available to templates as `{{ inputs.<key> }}`.
pub type RunInputs = BTreeMap<String, String>;

/// Step outputs in execution order.
///
/// Re-running a step replaces its output and moves it to the end, so
/// iteration order always reflects the most recent execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutputs {
    entries: Vec<(String, String)>,
}

impl StepOutputs {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the latest output of `step_id`.
    pub fn insert(&mut self, step_id: impl Into<String>, output: impl Into<String>) {
        let step_id = step_id.into();
        self.entries.retain(|(id, _)| *id != step_id);
        self.entries.push((step_id, output.into()));
    }

    /// Latest output of `step_id`.
    pub fn get(&self, step_id: &str) -> Option<&str> {
        self.entries.iter().find(|(id, _)| id == step_id).map(|(_, output)| output.as_str())
    }

    /// Most recently produced output.
    pub fn last(&self) -> Option<(&str, &str)> {
        self.entries.last().map(|(id, output)| (id.as_str(), output.as_str()))
    }

    /// Outputs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, output)| (id.as_str(), output.as_str()))
    }

    /// Number of steps with an output.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no step has produced output yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for StepOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, output) in &self.entries {
            map.serialize_entry(id, output)?;
        }
        map.end()
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Still executing.
    Running,
    /// Reached `END`.
    Succeeded,
    /// Stopped on an error.
    Failed,
    /// Stopped by cancellation.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// What happened in one step execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// Step id.
    pub step_id: String,
    /// Logical model the step routed to.
    pub model: String,
    /// How many times this step has run in this run, starting at 1.
    pub iteration: u32,
    /// Length of the resolved prompt in bytes; zero if resolution failed.
    pub prompt_len: usize,
    /// Length of the response in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_len: Option<usize>,
    /// Whether the response came from the cache.
    pub cached: bool,
    /// Wall time of the step.
    pub duration_ms: u64,
    /// Whether the step produced output.
    pub success: bool,
    /// Rendered error when the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final result of a run. Partial outputs survive failure and cancellation.
#[derive(Debug, Serialize)]
pub struct WorkflowOutcome {
    /// Run identifier.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Outputs produced before the run stopped.
    pub outputs: StepOutputs,
    /// Every step execution, in order.
    pub steps: Vec<StepRecord>,
    /// Transitions taken between steps.
    pub transitions: u32,
    /// Why the run did not succeed.
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run stopped.
    pub finished_at: DateTime<Utc>,
}

impl WorkflowOutcome {
    /// Whether the run reached `END`.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Latest output of a step.
    pub fn output(&self, step_id: &str) -> Option<&str> {
        self.outputs.get(step_id)
    }
}

#[allow(clippy::ref_option)]
fn serialize_error<S: Serializer>(error: &Option<WorkflowError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reinsert_moves_to_end() {
        let mut outputs = StepOutputs::new();
        outputs.insert("writer", "draft 1");
        outputs.insert("qa", "revise");
        outputs.insert("writer", "draft 2");

        let order: Vec<_> = outputs.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["qa", "writer"]);
        assert_eq!(outputs.get("writer"), Some("draft 2"));
        assert_eq!(outputs.last(), Some(("writer", "draft 2")));
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn test_outputs_serialize_in_order() {
        let mut outputs = StepOutputs::new();
        outputs.insert("b", "2");
        outputs.insert("a", "1");
        assert_eq!(serde_json::to_string(&outputs).unwrap(), r#"{"b":"2","a":"1"}"#);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_value(RunStatus::Cancelled).unwrap(), "CANCELLED");
    }
}
