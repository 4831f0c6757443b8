//! Node handlers: pluggable executors per node domain.
//!
//! Each handler prepares input context, invokes an external model provider
//! (walking the fallback chain), and parses provider output into
//! artifacts. Handler errors are contained per-node — `execute` returns a
//! `Failure` outcome rather than propagating, so a failing node never
//! aborts sibling concurrent nodes.
//!
//! Dispatch is a closed, exhaustive match over [`DomainKind`] — one
//! concrete type per domain, no runtime lookup table.

mod content;
mod discovery;
mod software;

pub use content::ContentHandler;
pub use discovery::DiscoveryHandler;
pub use software::SoftwareHandler;

use crate::context::AssembledContext;
use crate::graph::{DomainKind, GraphNode, NodeKind};
use crate::outcome::NodeOutcome;
use crate::provider::{
    invoke_with_fallbacks, ProviderRegistry, ProviderRequest, ProviderResponse,
};
use crate::stylesheet::ModelConfig;
use crate::workspace::WorkspaceHost;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// HandlerInput / NodeHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HandlerInput {
    pub run_id: String,
    pub context: AssembledContext,
    pub config: ModelConfig,
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, node: &GraphNode, input: HandlerInput) -> NodeOutcome;
}

// ---------------------------------------------------------------------------
// HandlerSet
// ---------------------------------------------------------------------------

/// One handler per domain, selected by exhaustive match.
pub struct HandlerSet {
    software: SoftwareHandler,
    content: ContentHandler,
    discovery: DiscoveryHandler,
}

impl HandlerSet {
    pub fn new(registry: Arc<ProviderRegistry>, workspaces: Arc<dyn WorkspaceHost>) -> Self {
        Self {
            software: SoftwareHandler::new(Arc::clone(&registry), workspaces),
            content: ContentHandler::new(Arc::clone(&registry)),
            discovery: DiscoveryHandler::new(registry),
        }
    }

    /// Discovery nodes use the discovery handler regardless of domain;
    /// everything else dispatches on domain. Mixed-domain nodes take the
    /// content path: they aggregate rather than isolate.
    pub fn handler_for(&self, node: &GraphNode) -> &dyn NodeHandler {
        if node.kind == NodeKind::Discovery {
            return &self.discovery;
        }
        match node.domain {
            DomainKind::Software => &self.software,
            DomainKind::Content => &self.content,
            DomainKind::Mixed => &self.content,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Build the user prompt: node instruction followed by the assembled
/// upstream context.
pub(crate) fn build_prompt(node: &GraphNode, input: &HandlerInput) -> String {
    let instruction = node.prompt.as_deref().unwrap_or(&node.id);
    let context = input.context.render();
    if context.is_empty() {
        instruction.to_string()
    } else {
        format!("{instruction}\n\n{context}")
    }
}

/// Invoke the provider chain and contain errors as a `Failure` outcome.
pub(crate) async fn invoke(
    registry: &ProviderRegistry,
    request: ProviderRequest,
) -> Result<ProviderResponse, NodeOutcome> {
    invoke_with_fallbacks(registry, &request)
        .await
        .map_err(|e| NodeOutcome::failure(e.to_string()))
}

/// Artifacts from a provider response: the raw text as the primary
/// artifact, structured fields merged over it.
pub(crate) fn response_artifacts(response: &ProviderResponse) -> BTreeMap<String, Value> {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        crate::outcome::PRIMARY_ARTIFACT.to_string(),
        Value::String(response.output.clone()),
    );
    for (key, value) in &response.fields {
        artifacts.insert(key.clone(), value.clone());
    }
    artifacts
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
