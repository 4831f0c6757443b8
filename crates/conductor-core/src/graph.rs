//! Workflow graph model: nodes, edges, edge conditions.
//!
//! A [`Graph`] is an immutable, validated description of a workflow,
//! constructed once per run from a YAML definition and never mutated.
//! Validation runs before any dispatch; readiness is a pure function of
//! the graph and the folded checkpoint state.

use crate::checkpoint::CheckpointState;
use crate::error::{ConductorError, Result};
use crate::gate::Criterion;
use crate::outcome::NodeOutcome;
use crate::paths;
use crate::stylesheet::ModelSelector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// Node enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Task,
    Discovery,
    Gate,
    FanOut,
    FanIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Software,
    #[default]
    Content,
    Mixed,
}

/// How much upstream output is forwarded to a node's execution. Bounds
/// the context shipped to cost- and latency-sensitive model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFidelity {
    #[default]
    Minimal,
    Partial,
    Full,
}

// ---------------------------------------------------------------------------
// GraphNode / GraphEdge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub domain: DomainKind,
    #[serde(default)]
    pub fidelity: ContextFidelity,
    /// Stylesheet class name or inline model config. `None` uses the
    /// stylesheet default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSelector>,
    /// Instruction text handed to the node's handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    // Gate-only fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<Criterion>,
    /// Node re-dispatched when this gate fails with retries remaining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_target: Option<String>,
    /// Retries after the first evaluation: `2` means up to three
    /// evaluations before the gate escalates.
    #[serde(default)]
    pub max_retries: u32,
}

/// Predicate over the source node's outcome. Edges with no condition are
/// unconditional: satisfied once the source succeeds (or is skipped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    GatePassed,
    GateFailed,
    OutputEquals { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let graph: Graph = serde_yaml::from_str(content)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Nodes with no incoming edge, in definition order.
    pub fn entry_nodes(&self) -> Vec<&GraphNode> {
        self.nodes
            .iter()
            .filter(|n| self.incoming(&n.id).next().is_none())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Structural validation. Fails before any dispatch with the first
    /// problem found: invalid or duplicate ids, dangling edges or retry
    /// targets, no entry node, or a cycle.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            paths::validate_node_id(&node.id)?;
            if !seen.insert(node.id.as_str()) {
                return Err(ConductorError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !seen.contains(end.as_str()) {
                    return Err(ConductorError::DanglingEdge(end.clone()));
                }
            }
        }

        for node in &self.nodes {
            if let Some(target) = &node.retry_target {
                if !seen.contains(target.as_str()) {
                    return Err(ConductorError::DanglingRetryTarget {
                        gate: node.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        if self.entry_nodes().is_empty() {
            return Err(ConductorError::NoEntry);
        }

        self.check_acyclic()
    }

    /// Iterative DFS with visiting/visited coloring. Reports a node on the
    /// first back edge found.
    fn check_acyclic(&self) -> Result<()> {
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            outgoing.entry(&edge.from).or_default().push(&edge.to);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut visiting: HashSet<&str> = HashSet::new();

        for start in &self.nodes {
            if visited.contains(start.id.as_str()) {
                continue;
            }
            // Stack of (node, next child index) frames.
            let mut stack: Vec<(&str, usize)> = vec![(start.id.as_str(), 0)];
            visiting.insert(&start.id);
            while let Some((id, child)) = stack.pop() {
                let children = outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]);
                if child < children.len() {
                    stack.push((id, child + 1));
                    let next = children[child];
                    if visiting.contains(next) {
                        return Err(ConductorError::Cycle(next.to_string()));
                    }
                    if !visited.contains(next) {
                        visiting.insert(next);
                        stack.push((next, 0));
                    }
                } else {
                    visiting.remove(id);
                    visited.insert(id);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    /// All nodes whose outcome is not yet recorded and whose every incoming
    /// edge is satisfied, in graph definition order (first-defined,
    /// first-dispatched — runs are reproducible under identical
    /// checkpoints). Multiple incoming edges AND together; there is no
    /// implicit OR, for fan-in and plain nodes alike.
    pub fn ready_nodes<'a>(&'a self, state: &CheckpointState) -> Vec<&'a GraphNode> {
        self.nodes
            .iter()
            .filter(|node| state.outcome(&node.id).is_none())
            .filter(|node| {
                self.incoming(&node.id).all(|edge| {
                    state
                        .outcome(&edge.from)
                        .is_some_and(|outcome| edge_satisfied(edge, outcome))
                })
            })
            .collect()
    }

    /// Transitive ancestors of `id` in definition order.
    pub fn ancestors<'a>(&'a self, id: &str) -> Vec<&'a GraphNode> {
        let mut found: BTreeSet<&str> = BTreeSet::new();
        let mut frontier: Vec<&str> = self.incoming(id).map(|e| e.from.as_str()).collect();
        while let Some(current) = frontier.pop() {
            if found.insert(current) {
                frontier.extend(self.incoming(current).map(|e| e.from.as_str()));
            }
        }
        self.nodes
            .iter()
            .filter(|n| found.contains(n.id.as_str()))
            .collect()
    }

    /// Direct predecessors of `id` in definition order.
    pub fn predecessors<'a>(&'a self, id: &str) -> Vec<&'a GraphNode> {
        let direct: HashSet<&str> = self.incoming(id).map(|e| e.from.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| direct.contains(n.id.as_str()))
            .collect()
    }
}

/// Whether an edge is satisfied by its source's recorded outcome.
///
/// Unconditional edges require a Success or Skipped source. Conditional
/// edges require only a terminal source whose outcome satisfies the
/// condition — a `gate_failed` edge must be able to fire on a failed gate.
pub fn edge_satisfied(edge: &GraphEdge, outcome: &NodeOutcome) -> bool {
    match &edge.condition {
        None => outcome.status.is_ok(),
        Some(EdgeCondition::GatePassed) => outcome.gate_passed() == Some(true),
        Some(EdgeCondition::GateFailed) => outcome.gate_passed() == Some(false),
        Some(EdgeCondition::OutputEquals { key, value }) => outcome
            .artifacts
            .get(key)
            .is_some_and(|v| match v {
                serde_json::Value::String(s) => s.trim() == value,
                other => other.to_string() == *value,
            }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
