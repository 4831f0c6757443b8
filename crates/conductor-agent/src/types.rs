//! Wire types for the agent CLI's `--output-format stream-json` protocol,
//! reduced to what the engine consumes: the init handshake, assistant
//! turns (logged, not interpreted), and the terminal result.

use conductor_core::stylesheet::{Effort, ModelConfig, ToolProfile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ─── Messages ─────────────────────────────────────────────────────────────

/// A known message on the subprocess stdout. Unknown `type` values are
/// skipped at the parse layer rather than failing the stream — the CLI
/// adds message types faster than we care about them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn as_result(&self) -> Option<&ResultMessage> {
        if let Message::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

/// `type = "system"` — only the init handshake fields matter here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `type = "assistant"` — an agent turn. The content is opaque to the
/// engine; it is surfaced in logs only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: serde_json::Value,
}

/// `type = "result"` — the terminal message of every query. `subtype` is
/// `"success"` or one of the `error_*` variants; the error family shares
/// its shape, so a single struct with a subtype string covers all of them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ResultMessage {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    pub fn result_text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }

    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            self.subtype.clone()
        } else {
            format!("{}: {}", self.subtype, self.errors.join("; "))
        }
    }
}

// ─── AgentOptions ─────────────────────────────────────────────────────────

/// Everything needed to spawn one agent CLI invocation, derived from the
/// engine's [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub binary: PathBuf,
    pub model: String,
    pub effort: Effort,
    pub tool_profile: ToolProfile,
    /// `None` means wait indefinitely.
    pub timeout: Option<Duration>,
    pub system_prompt: Option<String>,
    pub cwd: Option<PathBuf>,
}

impl AgentOptions {
    pub fn from_config(binary: PathBuf, config: &ModelConfig) -> Self {
        Self {
            binary,
            model: config.model.clone(),
            effort: config.effort,
            tool_profile: config.tool_profile,
            timeout: (config.timeout_seconds > 0)
                .then(|| Duration::from_secs(config.timeout_seconds as u64)),
            system_prompt: None,
            cwd: None,
        }
    }

    /// Tool names auto-approved for this profile.
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self.tool_profile {
            ToolProfile::ReadOnly => &["Read", "Glob", "Grep"],
            ToolProfile::Standard => &["Read", "Glob", "Grep", "Write", "Edit", "Bash"],
            ToolProfile::Full => &[],
        }
    }

    pub fn permission_mode(&self) -> &'static str {
        match self.tool_profile {
            ToolProfile::ReadOnly => "default",
            ToolProfile::Standard => "acceptEdits",
            ToolProfile::Full => "bypassPermissions",
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_message_parses_success_line() {
        let line = r#"{"type":"result","subtype":"success","session_id":"s1","result":"done","is_error":false,"num_turns":2,"duration_ms":1500}"#;
        let message: Message = serde_json::from_str(line).unwrap();
        let result = message.as_result().unwrap();
        assert!(result.is_success());
        assert_eq!(result.result_text(), "done");
        assert_eq!(result.num_turns, Some(2));
    }

    #[test]
    fn result_message_parses_error_subtypes_uniformly() {
        for subtype in ["error_during_execution", "error_max_turns"] {
            let line = format!(
                r#"{{"type":"result","subtype":"{subtype}","is_error":true,"errors":["boom"]}}"#
            );
            let message: Message = serde_json::from_str(&line).unwrap();
            let result = message.as_result().unwrap();
            assert!(!result.is_success());
            assert_eq!(result.error_summary(), format!("{subtype}: boom"));
        }
    }

    #[test]
    fn system_init_parses_with_extra_fields() {
        // The real CLI sends many more fields; they must not break parsing.
        let line = r#"{"type":"system","subtype":"init","session_id":"s1","model":"m","tools":[],"cwd":"/tmp"}"#;
        let message: Message = serde_json::from_str(line).unwrap();
        assert!(matches!(message, Message::System(_)));
    }

    #[test]
    fn options_derive_from_model_config() {
        let config = ModelConfig {
            provider: "agent-cli".to_string(),
            model: "claude-sonnet-4-6".to_string(),
            effort: Effort::High,
            tool_profile: ToolProfile::ReadOnly,
            timeout_seconds: 120,
            fallbacks: Vec::new(),
        };
        let opts = AgentOptions::from_config(PathBuf::from("/usr/bin/claude"), &config);
        assert_eq!(opts.model, "claude-sonnet-4-6");
        assert_eq!(opts.timeout, Some(Duration::from_secs(120)));
        assert_eq!(opts.allowed_tools(), &["Read", "Glob", "Grep"]);
        assert_eq!(opts.permission_mode(), "default");
    }

    #[test]
    fn zero_timeout_means_no_timeout() {
        let config = ModelConfig {
            provider: "agent-cli".to_string(),
            model: "m".to_string(),
            effort: Effort::Low,
            tool_profile: ToolProfile::Full,
            timeout_seconds: 0,
            fallbacks: Vec::new(),
        };
        let opts = AgentOptions::from_config(PathBuf::from("claude"), &config);
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.permission_mode(), "bypassPermissions");
        assert!(opts.allowed_tools().is_empty());
    }
}
