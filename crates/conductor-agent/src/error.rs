use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse stream-json line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("agent binary not found on PATH: {0}")]
    BinaryNotFound(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("stream ended without a result message")]
    MissingResult,
}

pub type Result<T> = std::result::Result<T, AgentError>;
