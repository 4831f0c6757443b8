//! Software-domain handler: isolated change-set workspace around each
//! provider invocation.

use super::{build_prompt, invoke, response_artifacts, HandlerInput, NodeHandler};
use crate::graph::GraphNode;
use crate::outcome::NodeOutcome;
use crate::provider::{ProviderRegistry, ProviderRequest};
use crate::workspace::WorkspaceHost;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are implementing a software change. \
Apply the requested change inside the workspace directory and report what \
you changed. Respond with a JSON object when you can; include a \
`tests_passed` boolean if you ran tests.";

pub struct SoftwareHandler {
    registry: Arc<ProviderRegistry>,
    workspaces: Arc<dyn WorkspaceHost>,
}

impl SoftwareHandler {
    pub fn new(registry: Arc<ProviderRegistry>, workspaces: Arc<dyn WorkspaceHost>) -> Self {
        Self {
            registry,
            workspaces,
        }
    }
}

#[async_trait]
impl NodeHandler for SoftwareHandler {
    async fn execute(&self, node: &GraphNode, input: HandlerInput) -> NodeOutcome {
        // Isolate before invoking — the provider works against this tree.
        let workspace = match self.workspaces.create(&node.id) {
            Ok(ws) => ws,
            Err(e) => return NodeOutcome::failure(format!("workspace create failed: {e}")),
        };

        let mut prompt = build_prompt(node, &input);
        prompt.push_str(&format!("\n\nWorkspace: {}", workspace.path.display()));

        let request = ProviderRequest {
            prompt,
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            config: input.config,
        };
        let response = match invoke(&self.registry, request).await {
            Ok(r) => r,
            // Failure leaves the workspace in place for inspection.
            Err(outcome) => return outcome,
        };

        if let Err(e) = self.workspaces.integrate(&workspace) {
            return NodeOutcome::failure(format!("workspace integration failed: {e}"));
        }

        let mut artifacts = response_artifacts(&response);
        artifacts.insert(
            "workspace".to_string(),
            Value::String(workspace.path.display().to_string()),
        );
        NodeOutcome::success(artifacts)
    }
}
