use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("edge references unknown node: {0}")]
    DanglingEdge(String),

    #[error("graph has no entry node: every node has an incoming edge")]
    NoEntry,

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("invalid node id '{0}': must be lowercase alphanumeric with hyphens or underscores")]
    InvalidNodeId(String),

    #[error("gate '{gate}' names unknown retry target '{target}'")]
    DanglingRetryTarget { gate: String, target: String },

    #[error("invalid run id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidRunId(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("checkpoint persistence failed: {0}")]
    Persistence(String),

    #[error("stylesheet has no entry for class '{0}'")]
    UnknownModelClass(String),

    #[error("workspace error for node '{node}': {reason}")]
    Workspace { node: String, reason: String },

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
