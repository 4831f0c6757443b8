use crate::error::{ConductorError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONDUCTOR_DIR: &str = ".conductor";
pub const RUNS_DIR: &str = ".conductor/runs";

pub const STYLESHEET_FILE: &str = ".conductor/stylesheet.yaml";
pub const CHECKPOINT_LOG: &str = "checkpoints.jsonl";
pub const WORKSPACES_DIR: &str = "workspaces";
pub const MERGED_DIR: &str = "merged";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn conductor_dir(root: &Path) -> PathBuf {
    root.join(CONDUCTOR_DIR)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(run_id)
}

pub fn checkpoint_log_path(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(CHECKPOINT_LOG)
}

pub fn stylesheet_path(root: &Path) -> PathBuf {
    root.join(STYLESHEET_FILE)
}

pub fn workspaces_dir(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(WORKSPACES_DIR)
}

pub fn workspace_dir(root: &Path, run_id: &str, node_id: &str) -> PathBuf {
    workspaces_dir(root, run_id).join(node_id)
}

pub fn merged_dir(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(MERGED_DIR)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap())
}

/// Node ids double as directory names under `workspaces/`, so they are
/// restricted to a filesystem-safe slug alphabet.
pub fn validate_node_id(id: &str) -> Result<()> {
    if id.is_empty() || !id_regex().is_match(id) {
        return Err(ConductorError::InvalidNodeId(id.to_string()));
    }
    Ok(())
}

/// Run ids name directories under `runs/`.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() || !id_regex().is_match(id) {
        return Err(ConductorError::InvalidRunId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
