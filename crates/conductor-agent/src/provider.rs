//! [`ModelProvider`] implementation backed by the agent CLI subprocess.

use crate::stream::{collect_result, MessageStream};
use crate::types::AgentOptions;
use crate::AgentError;
use async_trait::async_trait;
use conductor_core::provider::{
    ModelProvider, ProviderError, ProviderRequest, ProviderResponse,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Drives a `claude`-compatible agent CLI. The binary is resolved on PATH
/// once at construction; each `invoke` spawns one subprocess, enforces the
/// model config's timeout, and maps the terminal result into a
/// [`ProviderResponse`].
#[derive(Debug)]
pub struct AgentCliProvider {
    binary: PathBuf,
    /// Working directory for spawned agents (defaults to the process cwd).
    cwd: Option<PathBuf>,
}

impl AgentCliProvider {
    pub fn new(binary_name: &str) -> Result<Self, AgentError> {
        let binary = which::which(binary_name)
            .map_err(|_| AgentError::BinaryNotFound(binary_name.to_string()))?;
        Ok(Self { binary, cwd: None })
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Resolve lazily instead: useful when registering the provider before
    /// knowing whether any node will actually use it.
    pub fn at_path(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cwd: None,
        }
    }
}

#[async_trait]
impl ModelProvider for AgentCliProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut opts = AgentOptions::from_config(self.binary.clone(), &request.config);
        opts.system_prompt = request.system_prompt.clone();
        opts.cwd = self.cwd.clone();
        let timeout = opts.timeout;

        tracing::debug!(
            binary = %self.binary.display(),
            model = %opts.model,
            effort = opts.effort.as_str(),
            "invoking agent cli"
        );

        let stream = MessageStream::spawn(request.prompt.clone(), opts);
        let drive = collect_result(stream);
        let result = match timeout {
            None => drive.await,
            Some(limit) => match tokio::time::timeout(limit, drive).await {
                Ok(result) => result,
                // Dropping the stream kills the subprocess.
                Err(_) => {
                    return Err(ProviderError::Timeout {
                        seconds: request.config.timeout_seconds,
                    })
                }
            },
        };

        let result = result.map_err(|e| ProviderError::Failed(e.to_string()))?;
        if !result.is_success() {
            return Err(ProviderError::Failed(result.error_summary()));
        }

        let output = result.result_text().to_string();
        Ok(ProviderResponse {
            fields: extract_fields(&output),
            output,
        })
    }
}

/// Structured fields from the agent's final text: the whole text as a JSON
/// object, or the last ```json fenced block within it.
fn extract_fields(output: &str) -> BTreeMap<String, Value> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(output.trim()) {
        return map.into_iter().collect();
    }
    for block in fenced_json_blocks(output).iter().rev() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(block) {
            return map.into_iter().collect();
        }
    }
    BTreeMap::new()
}

fn fenced_json_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```json") {
        let body = &rest[start + "```json".len()..];
        let Some(end) = body.find("```") else { break };
        blocks.push(body[..end].trim().to_string());
        rest = &body[end + 3..];
    }
    blocks
}

// ─── Tests ────────────────────────────────────────────────────────────────
