//! Conversation engine for bif.
//!
//! An [`Agent`] owns the process-wide services (tool registry, approval gate,
//! model client) and hands out [`Conversation`]s. Each conversation runs the
//! agentic loop: send, stream, dispatch tools, feed results back, and nudge
//! the model until it emits the completion marker or the retry budget runs
//! out. UI-visible changes leave the engine as [`UiEvent`]s.

mod agent;
pub mod config;
pub mod context;
mod conversation;
mod error;
pub mod message_log;
pub mod model;
pub mod prompts;

pub use agent::Agent;
pub use config::{BifConfig, ConfigError};
pub use context::{ContextCollector, NoContext, RecentFiles};
pub use conversation::{AgenticLoop, Conversation, LoopSettings, LoopState, UiEvent, UiSender};
pub use error::EngineError;
pub use message_log::{ListenerHandle, MessageLog};
pub use model::{ModelClient, ModelFut, ModelRequest, ProviderModel};

pub use bif_providers::{ApiConfig, Provider};
pub use bif_tools::{ApprovalGate, ToolStateChange};
pub use bif_types::{ApprovalMode, ConversationId, EntryId, LogEntry, QueryContext, ToolState};
