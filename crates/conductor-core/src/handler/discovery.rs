//! Discovery handler: chooses between a lightweight and a deep
//! investigation strategy based on an upstream-supplied complexity signal.

use super::{build_prompt, invoke, response_artifacts, HandlerInput, NodeHandler};
use crate::graph::GraphNode;
use crate::outcome::NodeOutcome;
use crate::provider::{ProviderRegistry, ProviderRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const COMPLEXITY_KEY: &str = "complexity";

const LIGHT_SYSTEM_PROMPT: &str = "You are investigating a question rated \
low-complexity. Do a single focused pass: answer directly from the \
material at hand, listing only the essential findings.";

const DEEP_SYSTEM_PROMPT: &str = "You are investigating a complex \
question. Work systematically: enumerate hypotheses, examine each against \
the material, and report findings with the evidence that supports them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Lightweight,
    Deep,
}

impl Strategy {
    fn as_str(&self) -> &'static str {
        match self {
            Strategy::Lightweight => "lightweight",
            Strategy::Deep => "deep",
        }
    }
}

pub struct DiscoveryHandler {
    registry: Arc<ProviderRegistry>,
}

impl DiscoveryHandler {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

/// An upstream artifact named `complexity` (bare or node-qualified) rated
/// `low` or `trivial` selects the lightweight strategy. Absent or any
/// other value, the deep strategy runs — unknown complexity is treated as
/// complex.
fn choose_strategy(input: &HandlerInput) -> Strategy {
    let signal = input
        .context
        .artifacts
        .iter()
        .find(|(key, _)| {
            key.as_str() == COMPLEXITY_KEY || key.ends_with(&format!(".{COMPLEXITY_KEY}"))
        })
        .map(|(_, value)| match value {
            Value::String(s) => s.trim().to_lowercase(),
            other => other.to_string(),
        });
    match signal.as_deref() {
        Some("low") | Some("trivial") => Strategy::Lightweight,
        _ => Strategy::Deep,
    }
}

#[async_trait]
impl NodeHandler for DiscoveryHandler {
    async fn execute(&self, node: &GraphNode, input: HandlerInput) -> NodeOutcome {
        let strategy = choose_strategy(&input);
        tracing::debug!(node = %node.id, strategy = strategy.as_str(), "discovery strategy selected");

        let system = match strategy {
            Strategy::Lightweight => LIGHT_SYSTEM_PROMPT,
            Strategy::Deep => DEEP_SYSTEM_PROMPT,
        };
        let request = ProviderRequest {
            prompt: build_prompt(node, &input),
            system_prompt: Some(system.to_string()),
            config: input.config,
        };
        match invoke(&self.registry, request).await {
            Ok(response) => {
                let mut artifacts = response_artifacts(&response);
                artifacts.insert(
                    "strategy".to_string(),
                    Value::String(strategy.as_str().to_string()),
                );
                NodeOutcome::success(artifacts)
            }
            Err(outcome) => outcome,
        }
    }
}
