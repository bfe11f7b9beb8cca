//! Conversation message models.
//!
//! [`ChatMessage`] is the wire-level history sent to the model provider.
//! [`LogEntry`] is the display-oriented projection kept by the message log.

use serde::{Deserialize, Serialize};

use crate::{ToolCall, ToolIcon, ToolResult};

/// A message in the provider-facing conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult(ToolResult),
}

impl ChatMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(text.into())
    }

    #[must_use]
    pub fn assistant(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant { text, tool_calls }
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A tool-call request as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequestView {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub icon: Option<ToolIcon>,
}

/// A display entry in the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    User {
        text: String,
    },
    System {
        text: String,
    },
    Ai {
        text: Option<String>,
        tool_requests: Vec<ToolRequestView>,
    },
    ToolResult {
        id: String,
        tool_name: String,
        text: String,
        is_error: bool,
    },
    /// Model-layer failure surfaced to the user.
    Error {
        text: String,
    },
}

impl LogEntry {
    #[must_use]
    pub fn tool_result_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { id, .. } => Some(id),
            _ => None,
        }
    }
}
