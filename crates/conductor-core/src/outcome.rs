use crate::gate::CriterionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Artifact key a node's main product is published under. Minimal-fidelity
/// context assembly forwards only this artifact from each predecessor.
pub const PRIMARY_ARTIFACT: &str = "output";

/// Artifact key gate nodes publish their verdict under; conditional edges
/// (`gate_passed` / `gate_failed`) read it.
pub const GATE_PASSED_ARTIFACT: &str = "gate_passed";

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failure,
    Skipped,
    /// Terminal state of a gate that exhausted its retries. Distinct from
    /// `Failure` so the run surfaces it to the operator instead of
    /// classifying it as an ordinary failed node.
    Escalated,
}

impl NodeStatus {
    /// Success and Skipped satisfy unconditional downstream edges.
    pub fn is_ok(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Success => "success",
            NodeStatus::Failure => "failure",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// NodeOutcome
// ---------------------------------------------------------------------------

/// Result of one node execution attempt. Immutable after write; a retried
/// gate produces a new outcome that supersedes the prior one in the folded
/// state while the append-only log keeps the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Evaluated criterion results — present for gate nodes only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<CriterionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl NodeOutcome {
    fn base(status: NodeStatus) -> Self {
        Self {
            status,
            artifacts: BTreeMap::new(),
            started_at: Utc::now(),
            duration_ms: 0,
            criteria: Vec::new(),
            failure: None,
        }
    }

    pub fn success(artifacts: BTreeMap<String, Value>) -> Self {
        Self {
            artifacts,
            ..Self::base(NodeStatus::Success)
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::base(NodeStatus::Failure)
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::base(NodeStatus::Skipped)
        }
    }

    pub fn with_duration(mut self, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        self.started_at = started_at;
        self.duration_ms = duration_ms;
        self
    }

    /// The node's main product, if it published one.
    pub fn primary_artifact(&self) -> Option<&Value> {
        self.artifacts.get(PRIMARY_ARTIFACT)
    }

    /// Gate verdict: `Some(true)` passed, `Some(false)` failed or escalated,
    /// `None` for non-gate outcomes.
    pub fn gate_passed(&self) -> Option<bool> {
        self.artifacts.get(GATE_PASSED_ARTIFACT).and_then(Value::as_bool)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_outcome_carries_artifacts() {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(PRIMARY_ARTIFACT.to_string(), json!("diff applied"));
        let outcome = NodeOutcome::success(artifacts);
        assert_eq!(outcome.status, NodeStatus::Success);
        assert_eq!(outcome.primary_artifact(), Some(&json!("diff applied")));
        assert!(outcome.status.is_ok());
    }

    #[test]
    fn failure_outcome_records_reason() {
        let outcome = NodeOutcome::failure("provider chain exhausted");
        assert_eq!(outcome.status, NodeStatus::Failure);
        assert!(!outcome.status.is_ok());
        assert_eq!(outcome.failure.as_deref(), Some("provider chain exhausted"));
    }

    #[test]
    fn gate_verdict_read_from_artifacts() {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(GATE_PASSED_ARTIFACT.to_string(), json!(false));
        let outcome = NodeOutcome::success(artifacts);
        assert_eq!(outcome.gate_passed(), Some(false));

        let plain = NodeOutcome::success(BTreeMap::new());
        assert_eq!(plain.gate_passed(), None);
    }

    #[test]
    fn outcome_json_roundtrip() {
        let mut artifacts = BTreeMap::new();
        artifacts.insert("output".to_string(), json!({"files": 3}));
        let outcome = NodeOutcome::success(artifacts).with_duration(Utc::now(), 1200);
        let json = serde_json::to_string(&outcome).unwrap();
        let parsed: NodeOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&NodeStatus::Escalated).unwrap();
        assert_eq!(json, "\"escalated\"");
    }
}
