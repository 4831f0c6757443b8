//! Model-stylesheet configuration.
//!
//! An external mapping from class name ("planning", "review", "gate", …)
//! to a [`ModelConfig`], loaded once at engine start and read-only for the
//! run's lifetime. Nodes either name a class or carry an inline config.

use crate::error::{ConductorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Effort / ToolProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
    Max,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
            Effort::Max => "max",
        }
    }
}

/// Which tool set the provider exposes to the model for this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProfile {
    ReadOnly,
    Standard,
    Full,
}

impl ToolProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolProfile::ReadOnly => "read_only",
            ToolProfile::Standard => "standard",
            ToolProfile::Full => "full",
        }
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackEntry {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_effort")]
    pub effort: Effort,
    #[serde(default = "default_tool_profile")]
    pub tool_profile: ToolProfile,
    /// Per-invocation timeout. `0` means no timeout.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
    /// Ordered alternates tried after the primary fails, one attempt each.
    #[serde(default)]
    pub fallbacks: Vec<FallbackEntry>,
}

fn default_effort() -> Effort {
    Effort::Medium
}

fn default_tool_profile() -> ToolProfile {
    ToolProfile::Standard
}

fn default_timeout() -> u32 {
    300
}

// ---------------------------------------------------------------------------
// ModelSelector
// ---------------------------------------------------------------------------

/// How a node picks its model: a stylesheet class name, or an inline config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSelector {
    Class(String),
    Inline(ModelConfig),
}

// ---------------------------------------------------------------------------
// Stylesheet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stylesheet {
    /// Used when a node has no model selector.
    pub default: ModelConfig,
    #[serde(default)]
    pub classes: HashMap<String, ModelConfig>,
}

impl Stylesheet {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Resolve a node's selector against the stylesheet. An unknown class
    /// is an error at resolution time — callers resolve the whole graph
    /// up front so a bad class name aborts before any dispatch.
    pub fn resolve(&self, selector: Option<&ModelSelector>) -> Result<ModelConfig> {
        match selector {
            None => Ok(self.default.clone()),
            Some(ModelSelector::Inline(config)) => Ok(config.clone()),
            Some(ModelSelector::Class(name)) => self
                .classes
                .get(name)
                .cloned()
                .ok_or_else(|| ConductorError::UnknownModelClass(name.clone())),
        }
    }
}

impl Default for Stylesheet {
    fn default() -> Self {
        Self {
            default: ModelConfig {
                provider: "agent-cli".to_string(),
                model: "claude-sonnet-4-6".to_string(),
                effort: default_effort(),
                tool_profile: default_tool_profile(),
                timeout_seconds: default_timeout(),
                fallbacks: Vec::new(),
            },
            classes: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
