//! `conductor-agent` — agent-CLI model provider for the conductor engine.
//!
//! Drives a `claude`-compatible agent CLI subprocess using the
//! `--output-format stream-json` protocol and exposes it to the engine as
//! a [`conductor_core::provider::ModelProvider`].
//!
//! # Architecture
//!
//! ```text
//! ModelConfig (engine)
//!     │
//!     ▼
//! AgentOptions    ← model, effort, tool profile, timeout
//!     │
//!     ▼
//! AgentProcess    ← spawns `<binary> --print --output-format stream-json …`
//!     │              reads JSONL from stdout
//!     ▼
//! MessageStream   ← futures::Stream; background task + mpsc channel
//!     │
//!     ▼
//! AgentCliProvider::invoke → ProviderResponse (text + structured fields)
//! ```

pub mod error;
pub mod provider;
pub mod stream;
pub mod types;

pub(crate) mod process;

pub use error::AgentError;
pub use provider::AgentCliProvider;
pub use stream::MessageStream;
pub use types::{AgentOptions, Message, ResultMessage};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
