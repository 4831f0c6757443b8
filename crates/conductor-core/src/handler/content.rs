//! Content-domain handler: aggregate upstream source material, produce
//! drafted text. Also serves mixed-domain nodes.

use super::{build_prompt, invoke, response_artifacts, HandlerInput, NodeHandler};
use crate::graph::GraphNode;
use crate::outcome::NodeOutcome;
use crate::provider::{ProviderRegistry, ProviderRequest};
use async_trait::async_trait;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are drafting content from the provided \
source material. Produce the finished text; do not describe what you \
would write.";

pub struct ContentHandler {
    registry: Arc<ProviderRegistry>,
}

impl ContentHandler {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NodeHandler for ContentHandler {
    async fn execute(&self, node: &GraphNode, input: HandlerInput) -> NodeOutcome {
        let request = ProviderRequest {
            prompt: build_prompt(node, &input),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            config: input.config,
        };
        match invoke(&self.registry, request).await {
            Ok(response) => NodeOutcome::success(response_artifacts(&response)),
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::graph::DomainKind;
    use crate::outcome::NodeStatus;
    use crate::provider::ModelProvider;
    use serde_json::json;

    #[tokio::test]
    async fn draft_becomes_primary_artifact() {
        let provider = Arc::new(CannedProvider::text("# Release notes\n…"));
        let handler = ContentHandler::new(registry_with("p", Arc::clone(&provider) as Arc<dyn ModelProvider>));

        let node = task_node("notes", DomainKind::Content);
        let outcome = handler
            .execute(
                &node,
                input_with_context(test_config("p"), &[("changes", json!("fixed the bug"))]),
            )
            .await;

        assert_eq!(outcome.status, NodeStatus::Success);
        assert_eq!(outcome.artifacts["output"], json!("# Release notes\n…"));

        // Source material was aggregated into the prompt.
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("fixed the bug"));
    }

    #[tokio::test]
    async fn provider_failure_is_contained() {
        let handler = ContentHandler::new(registry_with("p", Arc::new(CannedProvider::failing())));
        let node = task_node("notes", DomainKind::Content);
        let outcome = handler
            .execute(&node, input_with_context(test_config("p"), &[]))
            .await;
        assert_eq!(outcome.status, NodeStatus::Failure);
    }
}
