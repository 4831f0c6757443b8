use crate::output;
use conductor_agent::AgentCliProvider;
use conductor_core::checkpoint::CheckpointStore;
use conductor_core::engine::{generate_run_id, Engine, EngineConfig, RunReport, RunState};
use conductor_core::graph::Graph;
use conductor_core::handler::HandlerSet;
use conductor_core::paths;
use conductor_core::provider::{ProviderRegistry, ScriptProvider};
use conductor_core::stylesheet::Stylesheet;
use conductor_core::workspace::DirWorkspaceHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct RunArgs {
    pub graph: PathBuf,
    pub run_id: Option<String>,
    pub max_cycles: u32,
    pub max_parallel: usize,
    pub stylesheet: Option<PathBuf>,
    pub agent_binary: String,
}

/// Execute a workflow to a terminal state. Exit codes: Completed 0,
/// Failed 1, Escalated 2, Interrupted 3.
pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<i32> {
    let graph = Graph::load(&args.graph)?;
    let stylesheet = load_stylesheet(root, args.stylesheet.as_deref())?;
    let run_id = args.run_id.unwrap_or_else(generate_run_id);

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(execute(
        root,
        graph,
        stylesheet,
        &run_id,
        EngineConfig {
            max_parallel: args.max_parallel,
            max_cycles: args.max_cycles,
        },
        &args.agent_binary,
    ))?;

    if json {
        output::print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(exit_code(report.state))
}

fn load_stylesheet(root: &Path, explicit: Option<&Path>) -> anyhow::Result<Stylesheet> {
    if let Some(path) = explicit {
        return Ok(Stylesheet::load(path)?);
    }
    let project_sheet = paths::stylesheet_path(root);
    if project_sheet.exists() {
        return Ok(Stylesheet::load(&project_sheet)?);
    }
    Ok(Stylesheet::default())
}

async fn execute(
    root: &Path,
    graph: Graph,
    stylesheet: Stylesheet,
    run_id: &str,
    config: EngineConfig,
    agent_binary: &str,
) -> anyhow::Result<RunReport> {
    let mut registry = ProviderRegistry::new();
    registry.register("script", Arc::new(ScriptProvider));
    match AgentCliProvider::new(agent_binary) {
        Ok(provider) => registry.register("agent-cli", Arc::new(provider.with_cwd(root))),
        // Graphs that only use the script provider still run.
        Err(e) => tracing::warn!(error = %e, "agent-cli provider not registered"),
    }

    let workspaces = Arc::new(DirWorkspaceHost::new(root, run_id));
    let handlers = HandlerSet::new(Arc::new(registry), workspaces);
    let engine = Engine::new(
        graph,
        CheckpointStore::new(root),
        handlers,
        stylesheet,
        config,
        run_id,
    );

    // Ctrl-C finishes in-flight nodes, checkpoints them, then stops
    // accepting new dispatches.
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight nodes");
            cancel.cancel();
        }
    });

    Ok(engine.run().await?)
}

fn print_report(report: &RunReport) {
    let rows: Vec<Vec<String>> = report
        .outcomes
        .iter()
        .map(|(id, outcome)| {
            vec![
                id.clone(),
                outcome.status.to_string(),
                format!("{}ms", outcome.duration_ms),
            ]
        })
        .collect();
    output::print_table(&["node", "status", "duration"], rows);

    for escalation in &report.escalations {
        println!(
            "escalated: gate '{}' after {} retries",
            escalation.gate, escalation.retries
        );
        for criterion in &escalation.failed_criteria {
            println!("  {} — {}", criterion.field, criterion.detail);
        }
    }

    println!(
        "run {} {} in {}ms",
        report.run_id, report.state, report.duration_ms
    );
}

fn exit_code(state: RunState) -> i32 {
    match state {
        RunState::Completed => 0,
        RunState::Failed => 1,
        RunState::Escalated => 2,
        RunState::Interrupted => 3,
        // Non-terminal states never reach the CLI boundary.
        RunState::Initializing | RunState::Running => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_terminal_states() {
        assert_eq!(exit_code(RunState::Completed), 0);
        assert_eq!(exit_code(RunState::Failed), 1);
        assert_eq!(exit_code(RunState::Escalated), 2);
        assert_eq!(exit_code(RunState::Interrupted), 3);
    }
}
