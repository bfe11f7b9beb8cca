//! Approval gate: per-call lifecycle state and one-shot approval signals.
//!
//! The gate is a shared service owned by the agent and handed to the invoker
//! and the UI as an `Arc<ApprovalGate>`. Every state mutation runs under one
//! lock and is broadcast to subscribers as a [`ToolStateChange`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bif_types::{ApprovalMode, ConversationId, ToolState};
use tokio::sync::{broadcast, oneshot};

const EVENT_CAPACITY: usize = 256;

/// Broadcast when a tool call changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStateChange {
    pub tool_call_id: String,
    pub conversation_id: Option<ConversationId>,
    pub state: ToolState,
}

#[derive(Debug)]
struct TrackedCall {
    state: ToolState,
    conversation: Option<ConversationId>,
}

/// A one-shot approval signal. The sender is held until a decision arrives;
/// the receiver until the invoker starts waiting.
#[derive(Debug)]
struct PendingSignal {
    armed_at: u64,
    resolve: Option<oneshot::Sender<bool>>,
    wait: Option<oneshot::Receiver<bool>>,
}

#[derive(Debug, Default)]
struct GateState {
    calls: HashMap<String, TrackedCall>,
    signals: HashMap<String, PendingSignal>,
    modes: HashMap<ConversationId, ApprovalMode>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct ApprovalGate {
    inner: Mutex<GateState>,
    events: broadcast::Sender<ToolStateChange>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(GateState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every subsequent state change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ToolStateChange> {
        self.events.subscribe()
    }

    /// Current state of a call. Unknown calls read as `Initial`.
    #[must_use]
    pub fn state(&self, tool_call_id: &str) -> ToolState {
        self.lock()
            .calls
            .get(tool_call_id)
            .map_or(ToolState::Initial, |call| call.state)
    }

    /// Associate a call with the conversation that dispatched it.
    pub fn track(&self, tool_call_id: &str, conversation: &ConversationId) {
        let mut inner = self.lock();
        let call = inner
            .calls
            .entry(tool_call_id.to_string())
            .or_insert(TrackedCall {
                state: ToolState::Initial,
                conversation: None,
            });
        call.conversation = Some(conversation.clone());
    }

    /// Move a tracked call to `state`. Calls that are not tracked, including
    /// those pruned by [`Self::end_conversation`], are left untouched.
    pub fn update_state(&self, tool_call_id: &str, state: ToolState) {
        let mut inner = self.lock();
        self.set_state_locked(&mut inner, tool_call_id, state);
    }

    fn set_state_locked(&self, inner: &mut GateState, tool_call_id: &str, state: ToolState) {
        let Some(call) = inner.calls.get_mut(tool_call_id) else {
            tracing::debug!(tool_call_id, ?state, "Ignoring state change for untracked call");
            return;
        };
        call.state = state;
        let change = ToolStateChange {
            tool_call_id: tool_call_id.to_string(),
            conversation_id: call.conversation.clone(),
            state,
        };
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    /// Mark a call as waiting and arm a fresh approval signal for it.
    pub fn request_approval(&self, tool_call_id: &str) {
        let (resolve, wait) = oneshot::channel();
        let mut inner = self.lock();
        inner
            .calls
            .entry(tool_call_id.to_string())
            .or_insert(TrackedCall {
                state: ToolState::Initial,
                conversation: None,
            });
        inner.next_seq += 1;
        let armed_at = inner.next_seq;
        inner.signals.insert(
            tool_call_id.to_string(),
            PendingSignal {
                armed_at,
                resolve: Some(resolve),
                wait: Some(wait),
            },
        );
        self.set_state_locked(&mut inner, tool_call_id, ToolState::WaitingForApproval);
        tracing::debug!(tool_call_id, "Tool call waiting for approval");
    }

    /// Suspend until the call is approved or rejected.
    ///
    /// Returns `false` when no signal was armed or when the signal is dropped
    /// before a decision (for example because the conversation ended).
    pub async fn await_approval(&self, tool_call_id: &str) -> bool {
        let wait = {
            let mut inner = self.lock();
            inner
                .signals
                .get_mut(tool_call_id)
                .and_then(|signal| signal.wait.take())
        };
        let Some(wait) = wait else {
            tracing::warn!(tool_call_id, "No approval signal armed for tool call");
            return false;
        };
        let approved = wait.await.unwrap_or(false);
        self.lock().signals.remove(tool_call_id);
        approved
    }

    /// Approve a waiting call. Returns `false` (and changes nothing) when the
    /// call was never put up for approval or was already decided.
    pub fn approve(&self, tool_call_id: &str) -> bool {
        self.resolve(tool_call_id, true)
    }

    /// Reject a waiting call. Same no-op rules as [`Self::approve`].
    pub fn reject(&self, tool_call_id: &str) -> bool {
        self.resolve(tool_call_id, false)
    }

    fn resolve(&self, tool_call_id: &str, approved: bool) -> bool {
        let mut inner = self.lock();
        let Some(resolve) = inner
            .signals
            .get_mut(tool_call_id)
            .and_then(|signal| signal.resolve.take())
        else {
            tracing::debug!(
                tool_call_id,
                approved,
                "Ignoring approval decision with no pending request"
            );
            return false;
        };
        let state = if approved {
            ToolState::Executing
        } else {
            ToolState::Rejected
        };
        // State is visible before the waiter resumes.
        self.set_state_locked(&mut inner, tool_call_id, state);
        drop(inner);
        // The waiter may already be gone; the decision still stands.
        let _ = resolve.send(approved);
        tracing::info!(tool_call_id, approved, "Tool call approval decided");
        true
    }

    /// Calls currently waiting for a decision, oldest request first.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<String> {
        let inner = self.lock();
        let mut pending: Vec<(u64, String)> = inner
            .signals
            .iter()
            .filter(|(_, signal)| signal.resolve.is_some())
            .map(|(id, signal)| (signal.armed_at, id.clone()))
            .collect();
        pending.sort();
        pending.into_iter().map(|(_, id)| id).collect()
    }

    /// Like [`Self::pending_approvals`], restricted to one conversation.
    #[must_use]
    pub fn pending_approvals_for(&self, conversation: &ConversationId) -> Vec<String> {
        let inner = self.lock();
        let mut pending: Vec<(u64, String)> = inner
            .signals
            .iter()
            .filter(|(_, signal)| signal.resolve.is_some())
            .filter(|(id, _)| {
                inner
                    .calls
                    .get(id.as_str())
                    .is_some_and(|call| call.conversation.as_ref() == Some(conversation))
            })
            .map(|(id, signal)| (signal.armed_at, id.clone()))
            .collect();
        pending.sort();
        pending.into_iter().map(|(_, id)| id).collect()
    }

    #[must_use]
    pub fn mode(&self, conversation: &ConversationId) -> ApprovalMode {
        self.lock()
            .modes
            .get(conversation)
            .copied()
            .unwrap_or_default()
    }

    /// Change the policy for a conversation. Calls already dispatched keep the
    /// mode they were dispatched under.
    pub fn set_mode(&self, conversation: &ConversationId, mode: ApprovalMode) {
        self.lock().modes.insert(conversation.clone(), mode);
        tracing::info!(conversation = %conversation, mode = %mode, "Approval mode changed");
    }

    /// Drop every piece of state owned by a conversation.
    ///
    /// Pending signals are dropped, so any waiter resumes with `false`.
    pub fn end_conversation(&self, conversation: &ConversationId) {
        let mut inner = self.lock();
        inner.modes.remove(conversation);
        let owned: Vec<String> = inner
            .calls
            .iter()
            .filter(|(_, call)| call.conversation.as_ref() == Some(conversation))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &owned {
            inner.calls.remove(id);
            inner.signals.remove(id);
        }
        tracing::debug!(
            conversation = %conversation,
            pruned = owned.len(),
            "Conversation state pruned"
        );
    }
}
