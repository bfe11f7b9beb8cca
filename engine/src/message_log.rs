//! Per-conversation message log.
//!
//! The log keeps two views of the same conversation: the provider-facing
//! [`ChatMessage`] history, and the display-facing [`LogEntry`] list in which
//! prompts are unwrapped and tool requests carry their icons. Listeners see
//! every appended entry.

use std::fmt;
use std::sync::Arc;

use bif_tools::ToolRegistry;
use bif_types::{ChatMessage, EntryId, LogEntry, ToolRequestView};

use crate::prompts::{unprompt_ai_message, unprompt_user_message};

pub type Listener = Arc<dyn Fn(EntryId, &LogEntry) + Send + Sync>;

/// Returned by [`MessageLog::add_listener`]; pass it back to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ListenerHandle(u64);

pub struct MessageLog {
    entries: Vec<(EntryId, LogEntry)>,
    history: Vec<ChatMessage>,
    listeners: Vec<(u64, Listener)>,
    next_entry: u64,
    next_listener: u64,
    registry: Arc<ToolRegistry>,
}

impl fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLog")
            .field("entries", &self.entries.len())
            .field("history", &self.history.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl MessageLog {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            entries: Vec::new(),
            history: Vec::new(),
            listeners: Vec::new(),
            next_entry: 0,
            next_listener: 0,
            registry,
        }
    }

    /// Append a message to the history and its display entry to the log.
    pub fn add(&mut self, message: ChatMessage) -> EntryId {
        let entry = self.to_entry(&message);
        self.history.push(message);
        self.push_entry(entry)
    }

    /// Append a display-only error entry. The model never sees it.
    pub fn push_error(&mut self, text: impl Into<String>) -> EntryId {
        self.push_entry(LogEntry::Error { text: text.into() })
    }

    pub fn add_listener(
        &mut self,
        listener: impl Fn(EntryId, &LogEntry) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Arc::new(listener)));
        ListenerHandle(id)
    }

    /// Returns `false` if the listener was already removed.
    pub fn remove_listener(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != handle.0);
        self.listeners.len() != before
    }

    #[must_use]
    pub fn entries(&self) -> &[(EntryId, LogEntry)] {
        &self.entries
    }

    /// Provider-facing history, in order.
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every tool-result entry for `tool_call_id`.
    pub fn results_for<'a>(
        &'a self,
        tool_call_id: &'a str,
    ) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(move |entry| entry.tool_result_id() == Some(tool_call_id))
    }

    fn push_entry(&mut self, entry: LogEntry) -> EntryId {
        let id = EntryId::new(self.next_entry);
        self.next_entry += 1;
        for (_, listener) in &self.listeners {
            listener(id, &entry);
        }
        self.entries.push((id, entry));
        id
    }

    fn to_entry(&self, message: &ChatMessage) -> LogEntry {
        match message {
            ChatMessage::User(text) => LogEntry::User {
                text: unprompt_user_message(text),
            },
            ChatMessage::System(text) => LogEntry::System { text: text.clone() },
            ChatMessage::Assistant { text, tool_calls } => LogEntry::Ai {
                text: text
                    .as_deref()
                    .map(unprompt_ai_message)
                    .filter(|t| !t.trim().is_empty()),
                tool_requests: tool_calls
                    .iter()
                    .map(|call| ToolRequestView {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        icon: self.registry.icon_for(&call.name),
                    })
                    .collect(),
            },
            ChatMessage::ToolResult(result) => LogEntry::ToolResult {
                id: result.tool_call_id.clone(),
                tool_name: result.tool_name.clone(),
                text: result.content.clone(),
                is_error: result.is_error,
            },
        }
    }
}
