//! Isolated change-set workspaces for software-domain nodes.
//!
//! Before a software node invokes its provider, the engine's workspace
//! collaborator creates an isolated directory keyed by node id. On success
//! the workspace is integrated (merged) into the run's shared result tree;
//! on failure it is left in place for inspection — never destroyed.

use crate::error::{ConductorError, Result};
use crate::{io, paths};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    pub node_id: String,
    pub path: PathBuf,
}

pub trait WorkspaceHost: Send + Sync {
    /// Create (or reuse) the isolated workspace for a node.
    fn create(&self, node_id: &str) -> Result<WorkspaceRef>;
    /// Merge a workspace into the shared result tree.
    fn integrate(&self, workspace: &WorkspaceRef) -> Result<()>;
    /// Remove a workspace without integrating it.
    fn discard(&self, workspace: &WorkspaceRef) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DirWorkspaceHost
// ---------------------------------------------------------------------------

/// Filesystem workspace host: per-node directories under the run dir,
/// integration by recursive copy into `merged/`.
#[derive(Debug, Clone)]
pub struct DirWorkspaceHost {
    root: PathBuf,
    run_id: String,
}

impl DirWorkspaceHost {
    pub fn new(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            run_id: run_id.into(),
        }
    }

    pub fn merged_dir(&self) -> PathBuf {
        paths::merged_dir(&self.root, &self.run_id)
    }
}

impl WorkspaceHost for DirWorkspaceHost {
    fn create(&self, node_id: &str) -> Result<WorkspaceRef> {
        paths::validate_node_id(node_id)?;
        let path = paths::workspace_dir(&self.root, &self.run_id, node_id);
        io::ensure_dir(&path)?;
        Ok(WorkspaceRef {
            node_id: node_id.to_string(),
            path,
        })
    }

    fn integrate(&self, workspace: &WorkspaceRef) -> Result<()> {
        if !workspace.path.exists() {
            return Err(ConductorError::Workspace {
                node: workspace.node_id.clone(),
                reason: "workspace directory missing at integration".to_string(),
            });
        }
        io::copy_tree(&workspace.path, &self.merged_dir())
    }

    fn discard(&self, workspace: &WorkspaceRef) -> Result<()> {
        if workspace.path.exists() {
            std::fs::remove_dir_all(&workspace.path)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
