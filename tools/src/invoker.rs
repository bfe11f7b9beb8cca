//! Invocation envelope shared by every tool.
//!
//! A tool body never runs before its approval resolves, runs at most once,
//! and always ends with a non-empty string or a [`ToolError`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bif_types::{ApprovalMode, CapabilitySet, ConversationId, ToolState};

use crate::{ApprovalGate, EMPTY_OUTPUT_PLACEHOLDER, ToolError};

/// Invocation metadata threaded from dispatch to the invoker.
///
/// The approval mode is a snapshot taken when the call was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub tool_call_id: String,
    pub conversation_id: ConversationId,
    pub approval_mode: ApprovalMode,
}

impl DispatchContext {
    pub fn new(
        tool_call_id: impl Into<String>,
        conversation_id: ConversationId,
        approval_mode: ApprovalMode,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            conversation_id,
            approval_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInvoker {
    gate: Arc<ApprovalGate>,
}

impl ToolInvoker {
    #[must_use]
    pub fn new(gate: Arc<ApprovalGate>) -> Self {
        Self { gate }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    /// Run a tool body through approval, deadline and output normalisation.
    pub async fn invoke<F>(
        &self,
        ctx: &DispatchContext,
        tool_name: &str,
        capabilities: CapabilitySet,
        timeout: Duration,
        body: F,
    ) -> Result<String, ToolError>
    where
        F: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let call_id = ctx.tool_call_id.as_str();
        self.gate.track(call_id, &ctx.conversation_id);

        if ctx.approval_mode.requires_approval(capabilities) {
            self.gate.request_approval(call_id);
            let approved = self.gate.await_approval(call_id).await;
            if !approved {
                // A dropped signal leaves no decision behind.
                if self.gate.state(call_id) != ToolState::Rejected {
                    self.gate.update_state(call_id, ToolState::Rejected);
                }
                tracing::info!(tool = tool_name, tool_call_id = call_id, "Tool call rejected");
                return Err(ToolError::Rejected {
                    tool: tool_name.to_string(),
                });
            }
        } else {
            self.gate.update_state(call_id, ToolState::Executing);
        }

        tracing::debug!(tool = tool_name, tool_call_id = call_id, ?timeout, "Executing tool");
        match run_with_deadline(tool_name, timeout, body).await {
            Ok(output) => {
                self.gate.update_state(call_id, ToolState::Completed);
                Ok(normalize_output(output))
            }
            Err(err) => {
                tracing::warn!(tool = tool_name, tool_call_id = call_id, error = %err, "Tool failed");
                self.gate.update_state(call_id, ToolState::Failed);
                Err(err)
            }
        }
    }
}

async fn run_with_deadline<F>(tool: &str, timeout: Duration, body: F) -> Result<String, ToolError>
where
    F: Future<Output = Result<String, ToolError>> + Send + 'static,
{
    let mut handle = tokio::spawn(body);
    match tokio::time::timeout(timeout, &mut handle).await {
        Err(_) => {
            // Dropping the body also drops any ChildGuard it holds.
            handle.abort();
            Err(ToolError::Timeout {
                tool: tool.to_string(),
                timeout,
            })
        }
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                "tool panicked".to_string()
            } else {
                "tool task was cancelled".to_string()
            };
            Err(ToolError::failed(tool, message))
        }
        Ok(Ok(Err(err))) => Err(into_execution_failure(tool, err)),
        Ok(Ok(Ok(output))) => Ok(output),
    }
}

/// Failures raised inside a body surface as `ExecutionFailed`, keeping the
/// original message. Only the envelope's own deadline maps to `Timeout`.
fn into_execution_failure(tool: &str, err: ToolError) -> ToolError {
    match err {
        ToolError::ExecutionFailed { .. } => err,
        ToolError::BadArgs { message } | ToolError::Configuration { message } => {
            ToolError::failed(tool, message)
        }
        other => ToolError::failed(tool, other.to_string()),
    }
}

fn normalize_output(output: String) -> String {
    if output.trim().is_empty() {
        EMPTY_OUTPUT_PLACEHOLDER.to_string()
    } else {
        output
    }
}
