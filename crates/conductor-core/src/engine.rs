//! The run loop: readiness, dispatch, retries, checkpointing, resume.
//!
//! State machine per run: `Initializing → Running → {Completed, Failed,
//! Escalated, Interrupted}`. Ready nodes with no dependency between them
//! dispatch concurrently into a bounded worker set; gates and fan nodes
//! are evaluated inline by the engine itself. The folded
//! [`CheckpointState`] is the only state shared across executions and is
//! mutated exclusively by the engine's single checkpoint-writer path —
//! handlers return outcomes, they never touch the store.

use crate::checkpoint::{CheckpointState, CheckpointStore, NodeCheckpoint};
use crate::context;
use crate::error::{ConductorError, Result};
use crate::gate::{self, CriterionResult};
use crate::graph::{edge_satisfied, Graph, GraphNode, NodeKind};
use crate::handler::{HandlerInput, HandlerSet};
use crate::outcome::{NodeOutcome, NodeStatus, GATE_PASSED_ARTIFACT};
use crate::stylesheet::{ModelConfig, Stylesheet};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// RunState / EngineConfig / RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Running,
    Completed,
    Failed,
    Escalated,
    Interrupted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Initializing => "initializing",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Escalated => "escalated",
            RunState::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded-concurrency worker set size.
    pub max_parallel: usize,
    /// Upper bound on node dispatches for the whole run; `0` is unbounded.
    /// Exhaustion interrupts (the run stays resumable) rather than fails.
    pub max_cycles: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_cycles: 0,
        }
    }
}

/// A gate that exhausted its retries, surfaced to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Escalation {
    pub gate: String,
    pub retries: u32,
    pub failed_criteria: Vec<CriterionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub outcomes: BTreeMap<String, NodeOutcome>,
    pub gate_retries: BTreeMap<String, u32>,
    pub escalations: Vec<Escalation>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    graph: Arc<Graph>,
    store: CheckpointStore,
    handlers: Arc<HandlerSet>,
    stylesheet: Arc<Stylesheet>,
    config: EngineConfig,
    cancel: CancellationToken,
    run_id: String,
}

pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Engine {
    pub fn new(
        graph: Graph,
        store: CheckpointStore,
        handlers: HandlerSet,
        stylesheet: Stylesheet,
        config: EngineConfig,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            store,
            handlers: Arc::new(handlers),
            stylesheet: Arc::new(stylesheet),
            config,
            cancel: CancellationToken::new(),
            run_id: run_id.into(),
        }
    }

    /// Token observed before every new dispatch. Cancelling lets in-flight
    /// nodes finish and checkpoint, then the run returns `Interrupted`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the run to a terminal state. Re-invoking with the same run id
    /// resumes from the checkpoint log: nodes with terminal outcomes are
    /// never re-executed.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();

        // Initializing: validate, resolve models, load or create state.
        // Everything here surfaces to the operator before any dispatch.
        self.graph.validate()?;
        crate::paths::validate_run_id(&self.run_id)?;
        let models = self.resolve_models()?;
        let mut state = self.store.load(&self.run_id)?;
        tracing::info!(
            run_id = %self.run_id,
            resumed_records = state.records,
            "run starting"
        );
        self.repair_interrupted_retries(&mut state)?;

        let mut inflight: JoinSet<(String, NodeOutcome)> = JoinSet::new();
        let mut inflight_ids: HashSet<String> = HashSet::new();
        let mut dispatches: u32 = 0;
        let mut interrupted = false;

        loop {
            if self.cancel.is_cancelled() {
                interrupted = true;
            }

            if !interrupted {
                // Structural nodes and skip propagation run to a fixpoint
                // before any provider dispatch; each can unlock further
                // nodes.
                loop {
                    if let Some(node) = self.next_structural(&state, &inflight_ids) {
                        if self.budget_spent(&mut dispatches, &mut interrupted) {
                            break;
                        }
                        self.execute_structural(node, &mut state)?;
                        continue;
                    }
                    if !self.skip_dead_branches(&mut state)? {
                        break;
                    }
                }
            }

            // Dispatch ready handler nodes up to the concurrency bound.
            if !interrupted {
                let ready: Vec<GraphNode> = self
                    .graph
                    .ready_nodes(&state)
                    .into_iter()
                    .filter(|n| !is_structural(n.kind))
                    .filter(|n| !inflight_ids.contains(&n.id))
                    .cloned()
                    .collect();
                for node in ready {
                    if inflight.len() >= self.config.max_parallel {
                        break;
                    }
                    if self.budget_spent(&mut dispatches, &mut interrupted) {
                        break;
                    }
                    let input = HandlerInput {
                        run_id: self.run_id.clone(),
                        context: context::assemble(&self.graph, &node, &state),
                        config: models[&node.id].clone(),
                    };
                    let handlers = Arc::clone(&self.handlers);
                    tracing::info!(node = %node.id, "dispatching");
                    inflight_ids.insert(node.id.clone());
                    inflight.spawn(async move {
                        let begun = Instant::now();
                        let started_at = Utc::now();
                        let outcome = handlers.handler_for(&node).execute(&node, input).await;
                        let outcome =
                            outcome.with_duration(started_at, begun.elapsed().as_millis() as u64);
                        (node.id, outcome)
                    });
                }
            }

            // Nothing running: the run is drained (terminal) or interrupted.
            let Some(joined) = inflight.join_next().await else {
                break;
            };

            // In-flight work always checkpoints, even when interrupting —
            // completed-but-unwritten work must not be lost.
            let (node_id, outcome) =
                joined.map_err(|e| ConductorError::Worker(e.to_string()))?;
            inflight_ids.remove(&node_id);
            tracing::info!(node = %node_id, status = %outcome.status, "node finished");
            self.commit(&mut state, &node_id, outcome)?;
        }

        let report = self.report(state, interrupted, started.elapsed().as_millis() as u64);
        tracing::info!(run_id = %self.run_id, state = %report.state, "run finished");
        Ok(report)
    }

    /// Count one dispatch against `max_cycles`. Returns true when the
    /// budget is already spent, flagging the run interrupted.
    fn budget_spent(&self, dispatches: &mut u32, interrupted: &mut bool) -> bool {
        if self.config.max_cycles > 0 && *dispatches >= self.config.max_cycles {
            tracing::warn!(max_cycles = self.config.max_cycles, "cycle budget exhausted");
            *interrupted = true;
            return true;
        }
        *dispatches += 1;
        false
    }

    /// Finish a gate retry that a crash cut short. In-process, a gate
    /// failure with retry budget left is always followed by reset records
    /// for the target and the gate; a folded state holding such a failure
    /// can therefore only come from a log truncated between those writes.
    /// Re-issue the missing resets so resume continues the retry instead
    /// of reporting a phantom terminal failure.
    fn repair_interrupted_retries(&self, state: &mut CheckpointState) -> Result<()> {
        let pending: Vec<(String, String)> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Gate)
            .filter_map(|n| n.retry_target.as_deref().map(|t| (n, t)))
            .filter(|(n, _)| {
                state
                    .outcome(&n.id)
                    .is_some_and(|o| o.status == NodeStatus::Failure)
                    && state.reset_count(&n.id) < n.max_retries
            })
            .map(|(n, t)| (n.id.clone(), t.to_string()))
            .collect();

        for (gate_id, target) in pending {
            tracing::warn!(gate = %gate_id, %target, "resuming gate retry cut short by restart");
            let reason = format!("gate '{gate_id}' retry resumed after restart");
            if state.outcome(&target).is_some() {
                self.commit_reset(state, &target, &reason)?;
            }
            self.commit_reset(state, &gate_id, &reason)?;
        }
        Ok(())
    }

    /// Resolve every node's model config up front so a bad stylesheet
    /// class aborts before any dispatch.
    fn resolve_models(&self) -> Result<HashMap<String, ModelConfig>> {
        let mut models = HashMap::new();
        for node in &self.graph.nodes {
            let config = self.stylesheet.resolve(node.model.as_ref())?;
            models.insert(node.id.clone(), config);
        }
        Ok(models)
    }

    /// Single checkpoint-writer path: persist first, then fold. A
    /// persistence failure aborts the run — resume correctness depends on
    /// complete checkpoint history.
    fn commit(&self, state: &mut CheckpointState, node_id: &str, outcome: NodeOutcome) -> Result<()> {
        let checkpoint = NodeCheckpoint::outcome(&self.run_id, node_id, outcome);
        self.store.append(&checkpoint)?;
        state.apply(&checkpoint);
        Ok(())
    }

    fn commit_reset(&self, state: &mut CheckpointState, node_id: &str, reason: &str) -> Result<()> {
        let checkpoint = NodeCheckpoint::reset(&self.run_id, node_id, reason);
        self.store.append(&checkpoint)?;
        state.apply(&checkpoint);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Structural nodes
    // -----------------------------------------------------------------------

    fn next_structural<'a>(
        &'a self,
        state: &CheckpointState,
        inflight_ids: &HashSet<String>,
    ) -> Option<&'a GraphNode> {
        self.graph
            .ready_nodes(state)
            .into_iter()
            .find(|n| is_structural(n.kind) && !inflight_ids.contains(&n.id))
    }

    /// Gates, fan-out and fan-in are engine-evaluated: deterministic, no
    /// provider involved.
    fn execute_structural(&self, node: &GraphNode, state: &mut CheckpointState) -> Result<()> {
        let begun = Instant::now();
        let started_at = Utc::now();
        match node.kind {
            NodeKind::Gate => return self.execute_gate(node, state, begun),
            NodeKind::FanOut => {
                let primaries = self.predecessor_primaries(node, state);
                let mut artifacts = BTreeMap::new();
                if let Some(value) = fan_out_primary(primaries) {
                    artifacts.insert(crate::outcome::PRIMARY_ARTIFACT.to_string(), value);
                }
                let outcome = NodeOutcome::success(artifacts)
                    .with_duration(started_at, begun.elapsed().as_millis() as u64);
                self.commit(state, &node.id, outcome)
            }
            NodeKind::FanIn => {
                let primaries = self.predecessor_primaries(node, state);
                let mut artifacts = BTreeMap::new();
                artifacts.insert(
                    crate::outcome::PRIMARY_ARTIFACT.to_string(),
                    Value::Object(primaries.into_iter().collect()),
                );
                let outcome = NodeOutcome::success(artifacts)
                    .with_duration(started_at, begun.elapsed().as_millis() as u64);
                self.commit(state, &node.id, outcome)
            }
            NodeKind::Task | NodeKind::Discovery => unreachable!("not structural"),
        }
    }

    fn predecessor_primaries(
        &self,
        node: &GraphNode,
        state: &CheckpointState,
    ) -> Vec<(String, Value)> {
        self.graph
            .predecessors(&node.id)
            .into_iter()
            .filter_map(|pred| {
                state
                    .outcome(&pred.id)
                    .and_then(|o| o.primary_artifact())
                    .map(|v| (pred.id.clone(), v.clone()))
            })
            .collect()
    }

    /// Deterministic gate evaluation with retry bookkeeping.
    ///
    /// Fail with retries remaining: checkpoint the failed outcome for
    /// audit, then reset the retry target and the gate itself — the gate's
    /// own reset count is its retry counter. Only the retry target
    /// re-executes; siblings downstream of it keep their outcomes. Fail at
    /// the bound: terminal Escalated outcome carrying the failed criteria.
    fn execute_gate(
        &self,
        node: &GraphNode,
        state: &mut CheckpointState,
        begun: Instant,
    ) -> Result<()> {
        let started_at = Utc::now();
        let outputs = context::aggregate_for_gate(&self.graph, &node.id, state);
        let evaluation = gate::evaluate(&node.criteria, &outputs);

        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            GATE_PASSED_ARTIFACT.to_string(),
            Value::Bool(evaluation.passed),
        );

        if evaluation.passed {
            let mut outcome = NodeOutcome::success(artifacts)
                .with_duration(started_at, begun.elapsed().as_millis() as u64);
            outcome.criteria = evaluation.criteria;
            tracing::info!(gate = %node.id, "gate passed");
            return self.commit(state, &node.id, outcome);
        }

        let failed: Vec<String> = evaluation
            .failed_criteria()
            .map(|c| c.field.clone())
            .collect();
        let retries_used = state.reset_count(&node.id);

        if let Some(target) = node.retry_target.as_deref() {
            if retries_used < node.max_retries {
                tracing::warn!(
                    gate = %node.id,
                    retry = retries_used + 1,
                    max_retries = node.max_retries,
                    %target,
                    failed = ?failed,
                    "gate failed, re-dispatching retry target"
                );
                let mut outcome = NodeOutcome::failure(format!(
                    "criteria failed: {}",
                    failed.join(", ")
                ))
                .with_duration(started_at, begun.elapsed().as_millis() as u64);
                outcome.artifacts = artifacts;
                outcome.criteria = evaluation.criteria;
                self.commit(state, &node.id, outcome)?;

                let reason = format!("gate '{}' retry {}", node.id, retries_used + 1);
                self.commit_reset(state, target, &reason)?;
                self.commit_reset(state, &node.id, &reason)?;
                return Ok(());
            }

            tracing::error!(
                gate = %node.id,
                retries = retries_used,
                failed = ?failed,
                "gate exhausted retries, escalating"
            );
            let mut outcome = NodeOutcome {
                status: NodeStatus::Escalated,
                artifacts,
                started_at,
                duration_ms: begun.elapsed().as_millis() as u64,
                criteria: evaluation.criteria,
                failure: Some(format!(
                    "escalated after {} retries; criteria failed: {}",
                    retries_used,
                    failed.join(", ")
                )),
            };
            outcome
                .artifacts
                .insert("retries".to_string(), Value::Number(retries_used.into()));
            return self.commit(state, &node.id, outcome);
        }

        // No retry target: a plain failed gate. A gate_failed edge may
        // route it; otherwise the run classifies Failed.
        tracing::warn!(gate = %node.id, failed = ?failed, "gate failed");
        let mut outcome = NodeOutcome::failure(format!(
            "criteria failed: {}",
            failed.join(", ")
        ))
        .with_duration(started_at, begun.elapsed().as_millis() as u64);
        outcome.artifacts = artifacts;
        outcome.criteria = evaluation.criteria;
        self.commit(state, &node.id, outcome)
    }

    // -----------------------------------------------------------------------
    // Skip propagation
    // -----------------------------------------------------------------------

    /// Checkpoint `Skipped` for nodes on branches not taken: a node whose
    /// incoming edge can never be satisfied because its source finished
    /// cleanly but the edge condition chose the other branch. Deadness
    /// propagates through conditional edges from dead nodes; unconditional
    /// edges from a skipped node stay satisfiable (Success/Skipped both
    /// satisfy them). Failure-caused unreachability is never skipped — it
    /// classifies the run as Failed.
    ///
    /// Returns true if anything was skipped.
    fn skip_dead_branches(&self, state: &mut CheckpointState) -> Result<bool> {
        let mut dead: BTreeSet<String> = BTreeSet::new();
        loop {
            let mut grew = false;
            for node in &self.graph.nodes {
                if state.outcome(&node.id).is_some() || dead.contains(&node.id) {
                    continue;
                }
                let condemned = self.graph.incoming(&node.id).any(|edge| {
                    if dead.contains(&edge.from) {
                        return edge.condition.is_some();
                    }
                    match state.outcome(&edge.from) {
                        Some(outcome) => {
                            outcome.status.is_ok() && !edge_satisfied(edge, outcome)
                        }
                        None => false,
                    }
                });
                if condemned {
                    dead.insert(node.id.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        for node_id in &dead {
            tracing::debug!(node = %node_id, "branch not taken, skipping");
            self.commit(state, node_id, NodeOutcome::skipped("branch not taken"))?;
        }
        Ok(!dead.is_empty())
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    fn report(&self, state: CheckpointState, interrupted: bool, duration_ms: u64) -> RunReport {
        let escalations: Vec<Escalation> = state
            .outcomes
            .iter()
            .filter(|(_, o)| o.status == NodeStatus::Escalated)
            .map(|(id, o)| Escalation {
                gate: id.clone(),
                retries: state.reset_count(id),
                failed_criteria: o.criteria.iter().filter(|c| !c.passed).cloned().collect(),
            })
            .collect();

        let gate_retries: BTreeMap<String, u32> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Gate)
            .map(|n| (n.id.clone(), state.reset_count(&n.id)))
            .filter(|(_, count)| *count > 0)
            .collect();

        let state_kind = classify(&self.graph, &state, interrupted);
        RunReport {
            run_id: self.run_id.clone(),
            state: state_kind,
            outcomes: state.outcomes,
            gate_retries,
            escalations,
            duration_ms,
        }
    }
}

fn is_structural(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Gate | NodeKind::FanOut | NodeKind::FanIn)
}

/// Fan-out forwards its predecessor's primary artifact; with several
/// predecessors the primaries are forwarded as a list.
fn fan_out_primary(mut primaries: Vec<(String, Value)>) -> Option<Value> {
    match primaries.len() {
        0 => None,
        1 => Some(primaries.remove(0).1),
        _ => Some(Value::Array(primaries.into_iter().map(|(_, v)| v).collect())),
    }
}

/// Terminal classification over the folded state.
fn classify(graph: &Graph, state: &CheckpointState, interrupted: bool) -> RunState {
    if state
        .outcomes
        .values()
        .any(|o| o.status == NodeStatus::Escalated)
    {
        return RunState::Escalated;
    }
    if state
        .outcomes
        .values()
        .any(|o| o.status == NodeStatus::Failure)
    {
        return RunState::Failed;
    }
    if graph
        .nodes
        .iter()
        .all(|n| state.outcome(&n.id).is_some_and(|o| o.status.is_ok()))
    {
        return RunState::Completed;
    }
    if interrupted {
        return RunState::Interrupted;
    }
    // Drained without failures but with unreached nodes: nothing can make
    // them ready, so the workflow cannot complete.
    RunState::Failed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{CompareOp, Criterion};
    use crate::graph::{ContextFidelity, DomainKind, GraphEdge};
    use crate::handler::HandlerSet;
    use crate::provider::{
        ModelProvider, ProviderError, ProviderRegistry, ProviderRequest, ProviderResponse,
    };
    use crate::stylesheet::{ModelConfig, Stylesheet};
    use crate::workspace::DirWorkspaceHost;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // -- test doubles -------------------------------------------------------

    /// Provider scripted per node id: each invocation returns the next
    /// canned response for the node named by the first prompt line.
    #[derive(Default)]
    struct ScriptedProvider {
        responses: Mutex<HashMap<String, Vec<std::result::Result<ProviderResponse, String>>>>,
        invocations: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn respond(&self, node: &str, fields: &[(&str, Value)]) {
            self.responses
                .lock()
                .unwrap()
                .entry(node.to_string())
                .or_default()
                .push(Ok(ProviderResponse {
                    output: format!("{node} done"),
                    fields: fields
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.clone()))
                        .collect(),
                }));
        }

        fn fail(&self, node: &str) {
            self.responses
                .lock()
                .unwrap()
                .entry(node.to_string())
                .or_default()
                .push(Err("scripted failure".to_string()));
        }

        fn invocations(&self) -> Vec<String> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn invoke(
            &self,
            request: &ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            // Prompts are built as "work on <id>…"; recover the node id.
            let node = request
                .prompt
                .lines()
                .next()
                .unwrap_or("")
                .rsplit(' ')
                .next()
                .unwrap_or("")
                .to_string();
            self.invocations.lock().unwrap().push(node.clone());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.entry(node.clone()).or_default();
            if queue.is_empty() {
                return Ok(ProviderResponse {
                    output: format!("{node} done"),
                    fields: BTreeMap::new(),
                });
            }
            queue.remove(0).map_err(ProviderError::Failed)
        }
    }

    // -- fixture ------------------------------------------------------------

    fn node(id: &str, kind: NodeKind) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind,
            domain: DomainKind::Content,
            fidelity: ContextFidelity::Minimal,
            model: None,
            prompt: Some(format!("work on {id}")),
            criteria: Vec::new(),
            retry_target: None,
            max_retries: 0,
        }
    }

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
        }
    }

    fn stylesheet() -> Stylesheet {
        Stylesheet {
            default: ModelConfig {
                provider: "scripted".to_string(),
                model: "test".to_string(),
                effort: crate::stylesheet::Effort::Low,
                tool_profile: crate::stylesheet::ToolProfile::Standard,
                timeout_seconds: 0,
                fallbacks: Vec::new(),
            },
            classes: HashMap::new(),
        }
    }

    struct Fixture {
        dir: TempDir,
        provider: Arc<ScriptedProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                provider: Arc::new(ScriptedProvider::default()),
            }
        }

        fn engine(&self, graph: Graph, run_id: &str) -> Engine {
            self.engine_with(graph, run_id, EngineConfig::default())
        }

        fn engine_with(&self, graph: Graph, run_id: &str, config: EngineConfig) -> Engine {
            let mut registry = ProviderRegistry::new();
            registry.register(
                "scripted",
                Arc::clone(&self.provider) as Arc<dyn ModelProvider>,
            );
            let registry = Arc::new(registry);
            let workspaces = Arc::new(DirWorkspaceHost::new(self.dir.path(), run_id));
            let handlers = HandlerSet::new(registry, workspaces);
            Engine::new(
                graph,
                CheckpointStore::new(self.dir.path()),
                handlers,
                stylesheet(),
                config,
                run_id,
            )
        }
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn linear_chain_completes_in_order() {
        let fixture = Fixture::new();
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Task), node("b", NodeKind::Task)],
            edges: vec![edge("a", "b")],
        };
        let report = fixture.engine(graph, "run-linear").run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(fixture.provider.invocations(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn diamond_fans_out_and_joins() {
        let fixture = Fixture::new();
        let graph = Graph {
            nodes: vec![
                node("a", NodeKind::Task),
                node("b", NodeKind::Task),
                node("c", NodeKind::Task),
                node("d", NodeKind::FanIn),
            ],
            edges: vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        };
        let report = fixture.engine(graph, "run-diamond").run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        // The fan-in aggregated both branch primaries.
        let fan_in = &report.outcomes["d"];
        let primary = fan_in.primary_artifact().unwrap();
        assert_eq!(primary["b"], json!("b done"));
        assert_eq!(primary["c"], json!("c done"));

        let invocations = fixture.provider.invocations();
        assert_eq!(invocations[0], "a");
        assert_eq!(invocations.len(), 3);
    }

    #[tokio::test]
    async fn failed_branch_blocks_fan_in_and_fails_run() {
        let fixture = Fixture::new();
        fixture.provider.fail("c");
        let graph = Graph {
            nodes: vec![
                node("a", NodeKind::Task),
                node("b", NodeKind::Task),
                node("c", NodeKind::Task),
                node("d", NodeKind::FanIn),
            ],
            edges: vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        };
        let report = fixture.engine(graph, "run-failed").run().await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.outcomes["c"].status, NodeStatus::Failure);
        // The fan-in never became ready.
        assert!(!report.outcomes.contains_key("d"));
    }

    #[tokio::test]
    async fn handler_failure_does_not_abort_sibling() {
        let fixture = Fixture::new();
        fixture.provider.fail("b");
        let graph = Graph {
            nodes: vec![
                node("a", NodeKind::Task),
                node("b", NodeKind::Task),
                node("c", NodeKind::Task),
            ],
            edges: vec![edge("a", "b"), edge("a", "c")],
        };
        let report = fixture.engine(graph, "run-sibling").run().await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        // The sibling branch still executed and succeeded.
        assert_eq!(report.outcomes["c"].status, NodeStatus::Success);
    }

    fn gate_node(id: &str, target: &str, max_retries: u32) -> GraphNode {
        let mut gate = node(id, NodeKind::Gate);
        gate.criteria = vec![Criterion {
            field: "tests_passed".to_string(),
            op: CompareOp::Eq,
            expected: json!(true),
        }];
        gate.retry_target = Some(target.to_string());
        gate.max_retries = max_retries;
        gate
    }

    #[tokio::test]
    async fn gate_passes_on_good_outputs() {
        let fixture = Fixture::new();
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(true))]);
        let graph = Graph {
            nodes: vec![
                node("implement", NodeKind::Task),
                gate_node("quality", "implement", 2),
                node("ship", NodeKind::Task),
            ],
            edges: vec![edge("implement", "quality"), edge("quality", "ship")],
        };
        let report = fixture.engine(graph, "run-gate-pass").run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.outcomes["quality"].gate_passed(), Some(true));
        assert!(report.gate_retries.is_empty());
    }

    #[tokio::test]
    async fn gate_retries_target_then_passes() {
        let fixture = Fixture::new();
        // First attempt fails the criterion, the retry passes.
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(false))]);
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(true))]);
        let graph = Graph {
            nodes: vec![
                node("implement", NodeKind::Task),
                gate_node("quality", "implement", 2),
            ],
            edges: vec![edge("implement", "quality")],
        };
        let report = fixture.engine(graph, "run-gate-retry").run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.gate_retries["quality"], 1);
        assert_eq!(fixture.provider.invocations(), vec!["implement", "implement"]);
    }

    #[tokio::test]
    async fn gate_escalates_after_exact_retry_bound() {
        let fixture = Fixture::new();
        // Every attempt fails its criterion.
        for _ in 0..4 {
            fixture
                .provider
                .respond("implement", &[("tests_passed", json!(false))]);
        }
        let graph = Graph {
            nodes: vec![
                node("implement", NodeKind::Task),
                gate_node("quality", "implement", 2),
            ],
            edges: vec![edge("implement", "quality")],
        };
        let report = fixture
            .engine(graph, "run-gate-escalate")
            .run()
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Escalated);
        // Initial + 2 retries: exactly 3 target executions, never a 4th.
        assert_eq!(fixture.provider.invocations().len(), 3);
        assert_eq!(report.outcomes["quality"].status, NodeStatus::Escalated);
        assert_eq!(report.escalations.len(), 1);
        let escalation = &report.escalations[0];
        assert_eq!(escalation.gate, "quality");
        assert_eq!(escalation.retries, 2);
        assert_eq!(escalation.failed_criteria[0].field, "tests_passed");
    }

    #[tokio::test]
    async fn gate_retry_does_not_invalidate_siblings() {
        let fixture = Fixture::new();
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(false))]);
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(true))]);
        // "docs" is a sibling downstream of the same root as "implement".
        let graph = Graph {
            nodes: vec![
                node("plan", NodeKind::Task),
                node("implement", NodeKind::Task),
                node("docs", NodeKind::Task),
                gate_node("quality", "implement", 2),
            ],
            edges: vec![
                edge("plan", "implement"),
                edge("plan", "docs"),
                edge("implement", "quality"),
            ],
        };
        let report = fixture
            .engine(graph, "run-gate-siblings")
            .run()
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        let runs_of = |id: &str| {
            fixture
                .provider
                .invocations()
                .iter()
                .filter(|n| n.as_str() == id)
                .count()
        };
        assert_eq!(runs_of("implement"), 2);
        // Only the retry target re-executed.
        assert_eq!(runs_of("plan"), 1);
        assert_eq!(runs_of("docs"), 1);
    }

    #[tokio::test]
    async fn conditional_branch_not_taken_is_skipped() {
        let fixture = Fixture::new();
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(true))]);
        let mut on_pass = edge("quality", "ship");
        on_pass.condition = Some(crate::graph::EdgeCondition::GatePassed);
        let mut on_fail = edge("quality", "triage");
        on_fail.condition = Some(crate::graph::EdgeCondition::GateFailed);
        let graph = Graph {
            nodes: vec![
                node("implement", NodeKind::Task),
                gate_node("quality", "implement", 0),
                node("ship", NodeKind::Task),
                node("triage", NodeKind::Task),
            ],
            edges: vec![edge("implement", "quality"), on_pass, on_fail],
        };
        let report = fixture.engine(graph, "run-branch").run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.outcomes["ship"].status, NodeStatus::Success);
        assert_eq!(report.outcomes["triage"].status, NodeStatus::Skipped);
        // The skipped branch never reached the provider.
        assert!(!fixture.provider.invocations().contains(&"triage".to_string()));
    }

    #[tokio::test]
    async fn resume_never_reexecutes_completed_nodes() {
        let fixture = Fixture::new();
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Task), node("b", NodeKind::Task)],
            edges: vec![edge("a", "b")],
        };

        // First run interrupted after "a": simulate by running with a
        // one-dispatch budget.
        let engine = fixture.engine_with(
            graph.clone(),
            "run-resume",
            EngineConfig {
                max_parallel: 4,
                max_cycles: 1,
            },
        );
        let report = engine.run().await.unwrap();
        assert_eq!(report.state, RunState::Interrupted);
        assert!(report.outcomes.contains_key("a"));
        assert!(!report.outcomes.contains_key("b"));

        // Resume with the same run id: A is not re-executed, B runs once.
        let engine = fixture.engine(graph, "run-resume");
        let report = engine.run().await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(fixture.provider.invocations(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn resume_repairs_gate_retry_cut_short() {
        let fixture = Fixture::new();
        // On re-run the retry target produces passing tests.
        fixture
            .provider
            .respond("implement", &[("tests_passed", json!(true))]);
        let graph = Graph {
            nodes: vec![
                node("implement", NodeKind::Task),
                gate_node("quality", "implement", 2),
            ],
            edges: vec![edge("implement", "quality")],
        };

        // Simulate a log truncated mid-retry: the target succeeded with
        // failing tests and the gate recorded its failure, but the process
        // died before the reset records were written.
        let store = CheckpointStore::new(fixture.dir.path());
        let mut artifacts = BTreeMap::new();
        artifacts.insert("tests_passed".to_string(), json!(false));
        store
            .append(&NodeCheckpoint::outcome(
                "run-repair",
                "implement",
                NodeOutcome::success(artifacts),
            ))
            .unwrap();
        let mut failed_gate = NodeOutcome::failure("criteria failed: tests_passed");
        failed_gate
            .artifacts
            .insert(GATE_PASSED_ARTIFACT.to_string(), json!(false));
        store
            .append(&NodeCheckpoint::outcome("run-repair", "quality", failed_gate))
            .unwrap();

        let report = fixture.engine(graph, "run-repair").run().await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        // The retry target re-ran exactly once after repair.
        assert_eq!(fixture.provider.invocations(), vec!["implement"]);
        assert_eq!(report.gate_retries["quality"], 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_before_new_dispatches() {
        let fixture = Fixture::new();
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Task), node("b", NodeKind::Task)],
            edges: vec![edge("a", "b")],
        };
        let engine = fixture.engine(graph, "run-cancel");
        engine.cancellation_token().cancel();
        let report = engine.run().await.unwrap();

        assert_eq!(report.state, RunState::Interrupted);
        assert!(report.outcomes.is_empty());
        assert!(fixture.provider.invocations().is_empty());
    }

    #[tokio::test]
    async fn validation_failure_aborts_before_any_dispatch() {
        let fixture = Fixture::new();
        let graph = Graph {
            nodes: vec![node("a", NodeKind::Task)],
            edges: vec![edge("a", "ghost")],
        };
        let err = fixture.engine(graph, "run-invalid").run().await;
        assert!(matches!(err, Err(ConductorError::DanglingEdge(_))));
        assert!(fixture.provider.invocations().is_empty());
        // No partial run was started.
        assert!(CheckpointStore::new(fixture.dir.path())
            .load("run-invalid")
            .unwrap()
            .outcomes
            .is_empty());
    }

    #[tokio::test]
    async fn parallel_branches_respect_concurrency_bound() {
        // Two independent roots run concurrently under max_parallel=2; a
        // counter provider asserts the bound is never exceeded.
        struct CountingProvider {
            current: AtomicU32,
            peak: AtomicU32,
        }

        #[async_trait]
        impl ModelProvider for CountingProvider {
            async fn invoke(
                &self,
                _: &ProviderRequest,
            ) -> std::result::Result<ProviderResponse, ProviderError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(ProviderResponse::default())
            }
        }

        let dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider {
            current: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.register("scripted", Arc::clone(&provider) as Arc<dyn ModelProvider>);
        let handlers = HandlerSet::new(
            Arc::new(registry),
            Arc::new(DirWorkspaceHost::new(dir.path(), "run-par")),
        );
        let graph = Graph {
            nodes: vec![
                node("w1", NodeKind::Task),
                node("w2", NodeKind::Task),
                node("w3", NodeKind::Task),
                node("w4", NodeKind::Task),
            ],
            edges: vec![],
        };
        let engine = Engine::new(
            graph,
            CheckpointStore::new(dir.path()),
            handlers,
            stylesheet(),
            EngineConfig {
                max_parallel: 2,
                max_cycles: 0,
            },
            "run-par",
        );
        let report = engine.run().await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
        assert!(provider.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn generated_run_ids_validate() {
        let id = generate_run_id();
        assert!(crate::paths::validate_run_id(&id).is_ok());
        assert_ne!(id, generate_run_id());
    }
}
