//! Model-invocation provider interface.
//!
//! The engine does not implement model calls itself — providers are an
//! injected capability. Handlers invoke the primary provider named by the
//! node's [`ModelConfig`] and walk the ordered fallback chain on failure,
//! one attempt per entry.

use crate::stylesheet::ModelConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

// ---------------------------------------------------------------------------
// Request / response / error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub config: ModelConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// Raw output text.
    pub output: String,
    /// Structured fields parsed from the output, when the provider
    /// returned a JSON object. Merged into the node's artifacts.
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider timed out after {seconds}s")]
    Timeout { seconds: u32 },

    #[error("provider failed: {0}")]
    Failed(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// ModelProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Name → provider. Built once at engine start; looked up by the provider
/// names in model configs and fallback entries.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned()
    }
}

/// Invoke the primary provider, then each fallback entry once, in order.
/// Returns the first success, or the last error once the chain is
/// exhausted. An unregistered provider name participates in the chain as
/// an `Unavailable` failure rather than aborting it.
pub async fn invoke_with_fallbacks(
    registry: &ProviderRegistry,
    request: &ProviderRequest,
) -> Result<ProviderResponse, ProviderError> {
    let mut attempts = Vec::with_capacity(1 + request.config.fallbacks.len());
    attempts.push((request.config.provider.clone(), request.config.model.clone()));
    for fallback in &request.config.fallbacks {
        attempts.push((fallback.provider.clone(), fallback.model.clone()));
    }

    let mut last_error = ProviderError::Unavailable("empty provider chain".to_string());
    for (provider_name, model) in attempts {
        let Some(provider) = registry.get(&provider_name) else {
            tracing::warn!(provider = %provider_name, "provider not registered, trying next");
            last_error = ProviderError::Unavailable(provider_name);
            continue;
        };
        let mut attempt = request.clone();
        attempt.config.provider = provider_name.clone();
        attempt.config.model = model.clone();
        match provider.invoke(&attempt).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                tracing::warn!(provider = %provider_name, model = %model, error = %e, "provider attempt failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

// ---------------------------------------------------------------------------
// ScriptProvider
// ---------------------------------------------------------------------------

/// Shell-command provider: the model config's `model` field is the command
/// line, run via `sh -c` with the prompt on stdin. Stdout that parses as a
/// JSON object becomes structured fields. Used for hermetic runs and as a
/// deterministic stand-in for model calls in tests and demos.
pub struct ScriptProvider;

#[async_trait]
impl ModelProvider for ScriptProvider {
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let command = request.config.model.trim();
        if command.is_empty() {
            return Err(ProviderError::Failed("script command is empty".to_string()));
        }

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("CONDUCTOR_EFFORT", request.config.effort.as_str())
            .env("CONDUCTOR_TOOL_PROFILE", request.config.tool_profile.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Failed(format!("failed to spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            // Writer is detached so a script that never reads stdin can't
            // deadlock against a full pipe.
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
            });
        }

        let seconds = request.config.timeout_seconds;
        let wait = child.wait_with_output();
        let output = if seconds == 0 {
            wait.await
        } else {
            match tokio::time::timeout(std::time::Duration::from_secs(seconds as u64), wait).await {
                Ok(result) => result,
                Err(_) => return Err(ProviderError::Timeout { seconds }),
            }
        }
        .map_err(|e| ProviderError::Failed(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed(format!(
                "script exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(parse_response(stdout))
    }
}

/// Structured fields are extracted when stdout is a JSON object; the raw
/// text is always preserved as `output`.
fn parse_response(stdout: String) -> ProviderResponse {
    let fields = match serde_json::from_str::<Value>(&stdout) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };
    ProviderResponse {
        output: stdout,
        fields,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
