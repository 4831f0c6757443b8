//! Upstream context assembly.
//!
//! How much upstream output a node sees is governed by its
//! [`ContextFidelity`]: `Minimal` forwards only each immediate
//! predecessor's primary artifact, `Partial` forwards head-truncated
//! summaries of every upstream artifact, `Full` forwards the complete
//! upstream artifact set. Gates always aggregate the full upstream output
//! map regardless of fidelity — criterion lookup must not be lossy.

use crate::checkpoint::CheckpointState;
use crate::graph::{ContextFidelity, Graph, GraphNode};
use serde_json::Value;
use std::collections::BTreeMap;

/// Character budget per artifact under `Partial` fidelity.
const SUMMARY_BUDGET: usize = 600;
const ELISION_MARKER: &str = "\n…[truncated]";

/// Context forwarded into a node's execution.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Forwarded artifacts, keyed `<node>.<artifact>` (or `<node>` for a
    /// minimal-fidelity primary artifact).
    pub artifacts: BTreeMap<String, Value>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Render the forwarded artifacts as a prompt section.
    pub fn render(&self) -> String {
        if self.artifacts.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Upstream context\n");
        for (key, value) in &self.artifacts {
            out.push_str(&format!("\n### {key}\n{}\n", render_value(value)));
        }
        out
    }
}

/// Assemble the context a node sees, per its fidelity mode. Upstream nodes
/// without a recorded outcome contribute nothing.
pub fn assemble(graph: &Graph, node: &GraphNode, state: &CheckpointState) -> AssembledContext {
    let mut artifacts = BTreeMap::new();
    match node.fidelity {
        ContextFidelity::Minimal => {
            for pred in graph.predecessors(&node.id) {
                if let Some(primary) = state
                    .outcome(&pred.id)
                    .and_then(|outcome| outcome.primary_artifact())
                {
                    artifacts.insert(pred.id.clone(), primary.clone());
                }
            }
        }
        ContextFidelity::Partial => {
            for (key, value) in upstream_artifacts(graph, &node.id, state) {
                artifacts.insert(key, summarize(&value));
            }
        }
        ContextFidelity::Full => {
            artifacts = upstream_artifacts(graph, &node.id, state);
        }
    }
    AssembledContext { artifacts }
}

/// Every artifact of every transitive ancestor with an outcome, keyed
/// `<node>.<artifact>`, in definition order.
fn upstream_artifacts(
    graph: &Graph,
    node_id: &str,
    state: &CheckpointState,
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for ancestor in graph.ancestors(node_id) {
        if let Some(outcome) = state.outcome(&ancestor.id) {
            for (key, value) in &outcome.artifacts {
                out.insert(format!("{}.{}", ancestor.id, key), value.clone());
            }
        }
    }
    out
}

/// Flat merge of upstream artifacts for gate evaluation: bare artifact
/// keys, later-defined ancestors overriding earlier ones, with the
/// node-qualified keys also present for disambiguation.
pub fn aggregate_for_gate(
    graph: &Graph,
    node_id: &str,
    state: &CheckpointState,
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for ancestor in graph.ancestors(node_id) {
        if let Some(outcome) = state.outcome(&ancestor.id) {
            for (key, value) in &outcome.artifacts {
                out.insert(key.clone(), value.clone());
                out.insert(format!("{}.{}", ancestor.id, key), value.clone());
            }
        }
    }
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Head-truncate an artifact to the summary budget.
fn summarize(value: &Value) -> Value {
    let text = render_value(value);
    if text.len() <= SUMMARY_BUDGET {
        return value.clone();
    }
    let mut end = SUMMARY_BUDGET;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Value::String(format!("{}{}", &text[..end], ELISION_MARKER))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
