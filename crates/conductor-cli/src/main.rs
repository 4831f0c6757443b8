mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Checkpointed DAG execution engine for agent workflows",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .conductor/ or .git/)
    #[arg(long, global = true, env = "CONDUCTOR_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold .conductor/ with a default stylesheet and example graph
    Init,

    /// Execute a workflow graph to a terminal state
    Run {
        /// Path to the graph definition (YAML)
        graph: PathBuf,

        /// Run id to create or resume (default: generated)
        #[arg(long)]
        run_id: Option<String>,

        /// Upper bound on node dispatches; 0 = unbounded
        #[arg(long, default_value = "0")]
        max_cycles: u32,

        /// Concurrent node executions
        #[arg(long, default_value = "4")]
        max_parallel: usize,

        /// Model stylesheet path (default: .conductor/stylesheet.yaml)
        #[arg(long)]
        stylesheet: Option<PathBuf>,

        /// Agent CLI binary for the agent-cli provider
        #[arg(long, default_value = "claude")]
        agent_binary: String,
    },

    /// Validate a graph definition without running it
    Validate {
        /// Path to the graph definition (YAML)
        graph: PathBuf,
    },

    /// Show run progress from the checkpoint log
    Status {
        /// Run id (omit to list all runs)
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = cli
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<tracing::Level>().ok())
        .unwrap_or(match &cli.command {
            Commands::Run { .. } => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        });

    // Logs go to stderr so stdout stays machine-readable under --json.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run {
            graph,
            run_id,
            max_cycles,
            max_parallel,
            stylesheet,
            agent_binary,
        } => cmd::run::run(
            &root,
            cmd::run::RunArgs {
                graph,
                run_id,
                max_cycles,
                max_parallel,
                stylesheet,
                agent_binary,
            },
            cli.json,
        ),
        Commands::Validate { graph } => cmd::validate::run(&graph, cli.json),
        Commands::Status { run_id } => cmd::status::run(&root, run_id.as_deref(), cli.json),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
