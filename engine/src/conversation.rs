//! The agentic conversation loop.
//!
//! ```text
//! Idle -> Sending -> StreamingPartial -> AwaitingToolResults -> Sending ...
//!                                     \-> Completed | Interrupted | Errored
//! ```
//!
//! A loop run sends the user's message, streams the reply, dispatches any
//! tool calls and feeds their results back until the model stops calling
//! tools. If the turn's text lacks [`COMPLETION_MARKER`](crate::prompts::COMPLETION_MARKER)
//! the model is nudged to continue, at most `max_attempts - 1` times.
//!
//! The loop never touches UI state. Everything a front end renders is sent
//! as a [`UiEvent`] over an unbounded channel and applied by its consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bif_tools::ToolDispatcher;
use bif_types::{
    ChatMessage, ConversationId, EntryId, LogEntry, QueryContext, StreamEvent, ToolCall,
    ToolDefinition, ToolResult,
};
use tokio::sync::mpsc;

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TOOL_ITERATIONS};
use crate::context::ContextCollector;
use crate::error::EngineError;
use crate::message_log::{ListenerHandle, MessageLog};
use crate::model::{ModelClient, ModelRequest};
use crate::prompts::{
    DEFAULT_CONTEXT_BUDGET_BYTES, KEEP_TRYING, SYSTEM_PROMPT, contains_completion_marker,
    render_conversation_prompt,
};

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Turn-level state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Idle,
    Sending,
    StreamingPartial,
    AwaitingToolResults,
    Completed,
    Interrupted,
    Errored,
}

impl LoopState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Errored)
    }
}

/// Update for the UI consumer. Every variant names its conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Entry {
        conversation: ConversationId,
        id: EntryId,
        entry: LogEntry,
    },
    /// Partial model text for the incomplete message.
    StreamDelta {
        conversation: ConversationId,
        text: String,
    },
    /// The incomplete message was cleared because an entry was appended.
    StreamCleared { conversation: ConversationId },
    Responding {
        conversation: ConversationId,
        responding: bool,
    },
    LoopState {
        conversation: ConversationId,
        state: LoopState,
    },
}

impl UiEvent {
    #[must_use]
    pub fn conversation(&self) -> &ConversationId {
        match self {
            Self::Entry { conversation, .. }
            | Self::StreamDelta { conversation, .. }
            | Self::StreamCleared { conversation }
            | Self::Responding { conversation, .. }
            | Self::LoopState { conversation, .. } => conversation,
        }
    }
}

pub type UiSender = mpsc::UnboundedSender<UiEvent>;

/// Interrupt signal for a running loop. Clones share the flag.
///
/// The flag is checked before every follow-up model request. A tool already
/// executing is left to finish.
#[derive(Debug, Clone, Default)]
pub struct AgenticLoop {
    interrupted: Arc<AtomicBool>,
}

impl AgenticLoop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Model turns per loop run, counting the first one.
    pub max_attempts: u32,
    /// Tool round-trips allowed within one turn.
    pub max_tool_iterations: u32,
    pub context_budget_bytes: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            context_budget_bytes: DEFAULT_CONTEXT_BUDGET_BYTES,
        }
    }
}

/// Why a turn stopped early.
enum TurnEnd {
    Interrupted,
    Failed(EngineError),
}

/// Text and tool calls assembled from one model reply.
#[derive(Debug, Default)]
struct StreamedReply {
    text: String,
    tool_calls: Vec<ToolCall>,
}

impl StreamedReply {
    fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    fn start_tool_call(&mut self, id: String, name: String) {
        self.tool_calls.push(ToolCall::new(id, name, String::new()));
    }

    fn push_tool_arguments(&mut self, id: &str, arguments: &str) {
        match self.tool_calls.iter_mut().rev().find(|call| call.id == id) {
            Some(call) => call.arguments.push_str(arguments),
            None => tracing::warn!(tool_call_id = id, "Arguments for unknown tool call"),
        }
    }

    fn into_message(self) -> (String, ChatMessage) {
        let text = (!self.text.is_empty()).then(|| self.text.clone());
        (self.text, ChatMessage::assistant(text, self.tool_calls))
    }
}

pub struct Conversation {
    id: ConversationId,
    log: MessageLog,
    context: QueryContext,
    /// Whether the first message (rendered through the task prompt) was sent.
    started: bool,
    responding: bool,
    state: LoopState,
    /// Streaming text not yet committed to the log.
    incomplete: Arc<Mutex<String>>,
    model: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    collector: Arc<dyn ContextCollector>,
    tools: Vec<ToolDefinition>,
    system_prompt: String,
    settings: LoopSettings,
    ui: UiSender,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("responding", &self.responding)
            .field("model", &self.model.model_name())
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    #[must_use]
    pub fn new(
        id: ConversationId,
        model: Arc<dyn ModelClient>,
        dispatcher: ToolDispatcher,
        collector: Arc<dyn ContextCollector>,
        settings: LoopSettings,
        ui: UiSender,
    ) -> Self {
        let registry = Arc::clone(dispatcher.registry());
        Self {
            id,
            log: MessageLog::new(Arc::clone(&registry)),
            context: QueryContext::default(),
            started: false,
            responding: false,
            state: LoopState::Idle,
            incomplete: Arc::default(),
            model,
            tools: registry.definitions(),
            dispatcher,
            collector,
            system_prompt: SYSTEM_PROMPT.to_string(),
            settings,
            ui,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    #[must_use]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.responding
    }

    /// Context accumulated over every loop run so far.
    #[must_use]
    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    #[must_use]
    pub fn incomplete_message(&self) -> String {
        self.incomplete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// Run one agentic loop for `message` and return the terminal state.
    ///
    /// `context` is merged into the conversation's context together with
    /// whatever the collector reports. The first message of a conversation is
    /// rendered through the task prompt; later ones are sent as typed.
    pub async fn run_agentic_loop(
        &mut self,
        message: &str,
        context: Option<QueryContext>,
        control: &AgenticLoop,
    ) -> LoopState {
        let project = self.collector.collect_project_context();
        let supplied = context.unwrap_or_default().merge(Some(&project));
        self.context = self.context.merge(Some(&supplied));

        let text = if self.started {
            message.to_string()
        } else {
            render_conversation_prompt(
                message,
                &self.context,
                self.dispatcher.project().path(),
                self.settings.context_budget_bytes,
            )
            .await
        };
        self.started = true;

        tracing::info!(
            conversation = %self.id,
            model = self.model.model_name(),
            "Agentic loop started"
        );
        let listener = self.install_log_forwarder();
        self.set_responding(true);

        let final_state = self.drive(ChatMessage::user(text), control).await;

        self.set_responding(false);
        self.log.remove_listener(listener);
        self.set_state(final_state);
        tracing::info!(conversation = %self.id, state = ?final_state, "Agentic loop finished");
        final_state
    }

    async fn drive(&mut self, first: ChatMessage, control: &AgenticLoop) -> LoopState {
        let mut attempts_left = self.settings.max_attempts.max(1);
        let mut next = first;

        loop {
            self.log.add(next);
            match self.run_turn(control).await {
                Ok(turn_text) => {
                    if contains_completion_marker(&turn_text) {
                        return LoopState::Completed;
                    }
                    if control.is_interrupted() {
                        return LoopState::Interrupted;
                    }
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        tracing::warn!(
                            conversation = %self.id,
                            "Retry budget exhausted without completion marker"
                        );
                        return LoopState::Completed;
                    }
                    tracing::debug!(
                        conversation = %self.id,
                        attempts_left,
                        "Completion marker missing, continuing"
                    );
                    next = ChatMessage::user(KEEP_TRYING);
                }
                Err(TurnEnd::Interrupted) => return LoopState::Interrupted,
                Err(TurnEnd::Failed(err)) => {
                    tracing::error!(conversation = %self.id, "Agentic loop failed: {err}");
                    self.log.push_error(err.to_string());
                    return LoopState::Errored;
                }
            }
        }
    }

    /// One model turn: request, stream, dispatch tools, repeat until the
    /// model replies without tool calls. Returns all text of the turn.
    async fn run_turn(&mut self, control: &AgenticLoop) -> Result<String, TurnEnd> {
        let mut turn_text = String::new();
        let mut iterations: u32 = 0;

        loop {
            self.set_state(LoopState::Sending);
            let reply = self.stream_reply().await.map_err(TurnEnd::Failed)?;
            let (text, message) = reply.into_message();
            turn_text.push_str(&text);
            let calls = message.tool_calls().to_vec();
            self.log.add(message);

            if calls.is_empty() {
                return Ok(turn_text);
            }

            iterations += 1;
            let limit = self.settings.max_tool_iterations;
            if iterations > limit {
                let err = EngineError::ToolIterationLimit { limit };
                // Every request still gets its result so the history stays valid.
                for call in &calls {
                    self.log.add(ChatMessage::ToolResult(ToolResult::error(
                        &call.id,
                        &call.name,
                        err.to_string(),
                    )));
                }
                return Err(TurnEnd::Failed(err));
            }

            self.set_state(LoopState::AwaitingToolResults);
            let results = self.dispatcher.dispatch_all(&self.id, &calls).await;
            for result in results {
                self.log.add(ChatMessage::ToolResult(result));
            }

            if control.is_interrupted() {
                tracing::info!(conversation = %self.id, "Interrupted before follow-up request");
                return Err(TurnEnd::Interrupted);
            }
        }
    }

    async fn stream_reply(&mut self) -> Result<StreamedReply, EngineError> {
        let (tx, mut rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let request = ModelRequest {
            messages: self.log.history(),
            system_prompt: &self.system_prompt,
            tools: &self.tools,
        };
        let producer = self.model.stream(request, tx);

        let id = &self.id;
        let ui = &self.ui;
        let state = &mut self.state;
        let incomplete = &self.incomplete;
        let consumer = async move {
            let mut reply = StreamedReply::default();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta(delta) => {
                        if *state != LoopState::StreamingPartial {
                            *state = LoopState::StreamingPartial;
                            let _ = ui.send(UiEvent::LoopState {
                                conversation: id.clone(),
                                state: *state,
                            });
                        }
                        reply.push_text(&delta);
                        incomplete
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push_str(&delta);
                        let _ = ui.send(UiEvent::StreamDelta {
                            conversation: id.clone(),
                            text: delta,
                        });
                    }
                    StreamEvent::ToolCallStart { id: call_id, name } => {
                        reply.start_tool_call(call_id, name);
                    }
                    StreamEvent::ToolCallDelta {
                        id: call_id,
                        arguments,
                    } => reply.push_tool_arguments(&call_id, &arguments),
                    StreamEvent::Done => return Ok(reply),
                    StreamEvent::Error(message) => {
                        return Err(EngineError::ModelRequestFailed(message));
                    }
                }
            }
            Err(EngineError::ModelRequestFailed(
                "Model stream ended before completion".to_string(),
            ))
        };

        let (sent, streamed) = tokio::join!(producer, consumer);
        if let Err(err) = sent {
            tracing::warn!("Model request failed: {err}");
            return Err(EngineError::ModelRequestFailed(err.to_string()));
        }
        streamed
    }

    /// Forward appended entries to the UI, clearing the incomplete message
    /// first. Installed for the duration of one loop run.
    fn install_log_forwarder(&mut self) -> ListenerHandle {
        let conversation = self.id.clone();
        let ui = self.ui.clone();
        let incomplete = Arc::clone(&self.incomplete);
        self.log.add_listener(move |id, entry| {
            let had_partial = {
                let mut partial = incomplete.lock().unwrap_or_else(PoisonError::into_inner);
                let had = !partial.is_empty();
                partial.clear();
                had
            };
            if had_partial {
                let _ = ui.send(UiEvent::StreamCleared {
                    conversation: conversation.clone(),
                });
            }
            let _ = ui.send(UiEvent::Entry {
                conversation: conversation.clone(),
                id,
                entry: entry.clone(),
            });
        })
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state == state {
            return;
        }
        tracing::debug!(conversation = %self.id, from = ?self.state, to = ?state, "Loop state");
        self.state = state;
        let _ = self.ui.send(UiEvent::LoopState {
            conversation: self.id.clone(),
            state,
        });
    }

    fn set_responding(&mut self, responding: bool) {
        self.responding = responding;
        let _ = self.ui.send(UiEvent::Responding {
            conversation: self.id.clone(),
            responding,
        });
    }
}

#[cfg(test)]
mod tests;
