//! Core domain types for bif.
//!
//! This crate is pure: no IO, no async, no provider specifics. It holds the
//! vocabulary shared by the tool runtime, the provider clients and the
//! conversation engine.

mod approval;
mod context;
mod ids;
mod message;

pub use approval::{ApprovalMode, CapabilitySet, ToolCapability, ToolState, UnknownApprovalMode};
pub use context::QueryContext;
pub use ids::{ConversationId, EntryId};
pub use message::{ChatMessage, LogEntry, ToolRequestView};

use serde::{Deserialize, Serialize};

// ============================================================================
// Streaming Events
// ============================================================================

/// Streaming event from the model provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text content delta.
    TextDelta(String),
    /// Tool call started.
    ToolCallStart { id: String, name: String },
    /// Tool call arguments delta (raw JSON fragment).
    ToolCallDelta { id: String, arguments: String },
    /// Stream completed.
    Done,
    /// Error occurred.
    Error(String),
}

// ============================================================================
// Tool Calling Types
// ============================================================================

/// Icon hint for rendering a tool in the chat view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolIcon {
    Execute,
    TestRun,
    Diff,
    Symbol,
    Find,
    Folder,
    Edit,
    Preview,
    Replace,
}

/// Definition of a tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (function name).
    pub name: String,
    /// A description of what the tool does, used by the model to decide when to call it.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool call requested by the model. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call (used to match results).
    pub id: String,
    /// The name of the tool being called.
    pub name: String,
    /// The serialized JSON arguments exactly as the model produced them.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments. An empty argument string is an empty object.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// The result of executing a tool call. Exactly one per completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the tool call this result is for.
    pub tool_call_id: String,
    /// The name of the tool that was called.
    pub tool_name: String,
    /// The result content.
    pub content: String,
    /// Whether the tool execution resulted in an error.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: error.into(),
            is_error: true,
        }
    }
}
