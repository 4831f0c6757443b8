//! Durable, crash-safe persistence of run progress.
//!
//! Each node transition appends one [`NodeCheckpoint`] record to a per-run
//! JSONL log. The log is append-only for audit; [`CheckpointStore::load`]
//! folds it in write order into the current [`CheckpointState`]. Every
//! commit goes through write-to-temp-then-atomic-rename, so a crash
//! mid-write never leaves a partial record visible.
//!
//! The store has no engine or graph knowledge: `Reset` records fold into
//! per-node reset counts (the engine reads a gate's own reset count as its
//! retry counter) without the store knowing what a gate is.

use crate::error::{ConductorError, Result};
use crate::outcome::NodeOutcome;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// NodeCheckpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointEntry {
    /// A node finished an execution attempt with this outcome.
    Outcome { outcome: NodeOutcome },
    /// The node's folded outcome is invalidated (gate retry re-dispatch).
    Reset { reason: String },
}

/// A single persisted delta: one node's transition within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCheckpoint {
    pub run_id: String,
    pub node_id: String,
    #[serde(flatten)]
    pub entry: CheckpointEntry,
    pub recorded_at: DateTime<Utc>,
}

impl NodeCheckpoint {
    pub fn outcome(run_id: &str, node_id: &str, outcome: NodeOutcome) -> Self {
        Self {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            entry: CheckpointEntry::Outcome { outcome },
            recorded_at: Utc::now(),
        }
    }

    pub fn reset(run_id: &str, node_id: &str, reason: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            entry: CheckpointEntry::Reset {
                reason: reason.into(),
            },
            recorded_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointState
// ---------------------------------------------------------------------------

/// The run's folded progress: latest outcome per node, reset counts, and
/// the number of records folded (the run's monotonic position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub run_id: String,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    pub reset_counts: BTreeMap<String, u32>,
    pub records: usize,
}

impl CheckpointState {
    pub fn fresh(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            outcomes: BTreeMap::new(),
            reset_counts: BTreeMap::new(),
            records: 0,
        }
    }

    /// Fold one record. Later outcomes supersede earlier ones; a reset
    /// removes the folded outcome and bumps the node's reset count.
    pub fn apply(&mut self, checkpoint: &NodeCheckpoint) {
        match &checkpoint.entry {
            CheckpointEntry::Outcome { outcome } => {
                self.outcomes
                    .insert(checkpoint.node_id.clone(), outcome.clone());
            }
            CheckpointEntry::Reset { .. } => {
                self.outcomes.remove(&checkpoint.node_id);
                *self
                    .reset_counts
                    .entry(checkpoint.node_id.clone())
                    .or_insert(0) += 1;
            }
        }
        self.records += 1;
    }

    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node_id)
    }

    /// How many times this node has been reset. For a gate node this is
    /// its retry counter.
    pub fn reset_count(&self, node_id: &str) -> u32 {
        self.reset_counts.get(node_id).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Filesystem checkpoint store rooted at a project directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn log_path(&self, run_id: &str) -> PathBuf {
        paths::checkpoint_log_path(&self.root, run_id)
    }

    /// Append one record to the run's log. The whole log is rewritten via
    /// temp-file + atomic rename so readers never observe a torn tail.
    ///
    /// A write failure is a [`ConductorError::Persistence`] — fatal to the
    /// run, since continuing without durable checkpoints risks silent
    /// progress loss on resume.
    pub fn append(&self, checkpoint: &NodeCheckpoint) -> Result<()> {
        let path = self.log_path(&checkpoint.run_id);
        let mut log = match std::fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ConductorError::Persistence(e.to_string())),
        };
        let line = serde_json::to_string(checkpoint)
            .map_err(|e| ConductorError::Persistence(e.to_string()))?;
        log.push_str(&line);
        log.push('\n');
        io::atomic_write(&path, log.as_bytes())
            .map_err(|e| ConductorError::Persistence(e.to_string()))
    }

    /// Fold all persisted records for `run_id` in write order. Returns a
    /// fresh state when no log exists. Loading is read-only and idempotent:
    /// replaying the same log always yields the same state.
    pub fn load(&self, run_id: &str) -> Result<CheckpointState> {
        let path = self.log_path(run_id);
        let mut state = CheckpointState::fresh(run_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(state),
            Err(e) => return Err(ConductorError::Persistence(e.to_string())),
        };
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let checkpoint: NodeCheckpoint = serde_json::from_str(line)?;
            state.apply(&checkpoint);
        }
        Ok(state)
    }

    /// Run ids with a persisted log, sorted ascending.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let runs = paths::runs_dir(&self.root);
        if !runs.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&runs)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join(paths::CHECKPOINT_LOG).exists() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::NodeStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn success(key: &str, value: serde_json::Value) -> NodeOutcome {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(key.to_string(), value);
        NodeOutcome::success(artifacts)
    }

    #[test]
    fn append_then_load_reflects_outcome() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());

        store
            .append(&NodeCheckpoint::outcome(
                "r1",
                "plan",
                success("output", json!("the plan")),
            ))
            .unwrap();

        let state = store.load("r1").unwrap();
        assert_eq!(state.records, 1);
        let outcome = state.outcome("plan").unwrap();
        assert_eq!(outcome.status, NodeStatus::Success);
        assert_eq!(outcome.primary_artifact(), Some(&json!("the plan")));
    }

    #[test]
    fn load_missing_run_is_fresh() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let state = store.load("nope").unwrap();
        assert_eq!(state, CheckpointState::fresh("nope"));
    }

    #[test]
    fn load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .append(&NodeCheckpoint::outcome("r1", "a", success("output", json!(1))))
            .unwrap();
        store
            .append(&NodeCheckpoint::reset("r1", "a", "gate retry"))
            .unwrap();
        store
            .append(&NodeCheckpoint::outcome("r1", "a", success("output", json!(2))))
            .unwrap();

        let first = store.load("r1").unwrap();
        let second = store.load("r1").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.records, 3);
    }

    #[test]
    fn later_outcome_supersedes_earlier() {
        let mut state = CheckpointState::fresh("r1");
        state.apply(&NodeCheckpoint::outcome("r1", "a", success("output", json!("v1"))));
        state.apply(&NodeCheckpoint::outcome("r1", "a", success("output", json!("v2"))));
        assert_eq!(
            state.outcome("a").unwrap().primary_artifact(),
            Some(&json!("v2"))
        );
        assert_eq!(state.records, 2);
    }

    #[test]
    fn reset_removes_outcome_and_counts() {
        let mut state = CheckpointState::fresh("r1");
        state.apply(&NodeCheckpoint::outcome("r1", "gate", success("gate_passed", json!(false))));
        state.apply(&NodeCheckpoint::reset("r1", "gate", "criteria failed"));
        assert!(state.outcome("gate").is_none());
        assert_eq!(state.reset_count("gate"), 1);

        state.apply(&NodeCheckpoint::reset("r1", "gate", "criteria failed"));
        assert_eq!(state.reset_count("gate"), 2);
        assert_eq!(state.reset_count("other"), 0);
    }

    #[test]
    fn log_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = CheckpointStore::new(dir.path());
            store
                .append(&NodeCheckpoint::outcome("r1", "a", success("output", json!("x"))))
                .unwrap();
        }
        // A new store over the same root sees the committed record.
        let store = CheckpointStore::new(dir.path());
        let state = store.load("r1").unwrap();
        assert!(state.outcome("a").is_some());
    }

    #[test]
    fn runs_are_isolated_by_id() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .append(&NodeCheckpoint::outcome("r1", "a", success("output", json!(1))))
            .unwrap();
        store
            .append(&NodeCheckpoint::outcome("r2", "b", success("output", json!(2))))
            .unwrap();

        assert!(store.load("r1").unwrap().outcome("b").is_none());
        assert!(store.load("r2").unwrap().outcome("a").is_none());
        assert_eq!(store.list_runs().unwrap(), vec!["r1", "r2"]);
    }

    #[test]
    fn checkpoint_json_roundtrip() {
        let checkpoint = NodeCheckpoint::reset("r1", "gate", "retry 1");
        let json = serde_json::to_string(&checkpoint).unwrap();
        assert!(json.contains("\"kind\":\"reset\""));
        let parsed: NodeCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, checkpoint);
    }
}
