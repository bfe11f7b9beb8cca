//! Turn model tool calls into tool results.

use std::sync::Arc;

use bif_types::{ConversationId, ToolCall, ToolResult, ToolState};
use futures_util::future::join_all;

use super::{
    ApprovalGate, DispatchContext, ProjectRoot, ToolCtx, ToolError, ToolInvoker, ToolRegistry,
    validate_args,
};

/// Routes each call to its tool through the invoker.
///
/// Every call yields exactly one [`ToolResult`] carrying the call's id, even
/// when the tool is unknown, the arguments are malformed or the call is rejected.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    invoker: ToolInvoker,
    project: ProjectRoot,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ApprovalGate>, project: ProjectRoot) -> Self {
        Self {
            registry,
            invoker: ToolInvoker::new(gate),
            project,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        self.invoker.gate()
    }

    #[must_use]
    pub fn project(&self) -> &ProjectRoot {
        &self.project
    }

    pub async fn dispatch(&self, conversation: &ConversationId, call: &ToolCall) -> ToolResult {
        let gate = self.invoker.gate();
        let ctx = DispatchContext::new(call.id.clone(), conversation.clone(), gate.mode(conversation));
        gate.track(&call.id, conversation);

        match self.try_dispatch(&ctx, call).await {
            Ok(output) => ToolResult::success(&call.id, &call.name, output),
            Err(err) => {
                // Failures before invocation never reached a lifecycle state.
                if gate.state(&call.id) == ToolState::Initial {
                    gate.update_state(&call.id, ToolState::Failed);
                }
                ToolResult::error(&call.id, &call.name, err.to_string())
            }
        }
    }

    /// Dispatch every call concurrently. Results keep the order of `calls`.
    pub async fn dispatch_all(
        &self,
        conversation: &ConversationId,
        calls: &[ToolCall],
    ) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.dispatch(conversation, call))).await
    }

    async fn try_dispatch(&self, ctx: &DispatchContext, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self.registry.lookup(&call.name)?;
        let args = call.parsed_arguments().map_err(|e| ToolError::BadArgs {
            message: format!("arguments are not valid JSON: {e}"),
        })?;
        validate_args(&tool.schema(), &args)?;

        let tool_ctx = ToolCtx {
            project: self.project.clone(),
            tool_call_id: call.id.clone(),
        };
        let body_tool = Arc::clone(&tool);
        let body = async move { body_tool.execute(args, &tool_ctx).await };

        self.invoker
            .invoke(ctx, tool.name(), tool.capabilities(), tool.timeout(), body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bif_types::{ApprovalMode, ConversationId, ToolCall, ToolState};

    use super::ToolDispatcher;
    use crate::test_support::EchoTool;
    use crate::{ApprovalGate, ProjectRoot, ToolExecutor, ToolRegistry};

    fn dispatcher(dir: &tempfile::TempDir) -> ToolDispatcher {
        let registry = ToolRegistry::from_tools([
            Arc::new(EchoTool::read_only("echo")) as Arc<dyn ToolExecutor>,
        ])
        .unwrap();
        ToolDispatcher::new(
            Arc::new(registry),
            Arc::new(ApprovalGate::new()),
            ProjectRoot::new(dir.path()).unwrap(),
        )
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_with_call_id() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir);
        let conv = ConversationId::new("conv_1");
        let result = d.dispatch(&conv, &ToolCall::new("c1", "nope", "{}")).await;
        assert_eq!(result.tool_call_id, "c1");
        assert!(result.is_error);
        assert!(result.content.contains("Unknown tool"));
        assert_eq!(d.gate().state("c1"), ToolState::Failed);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir);
        let conv = ConversationId::new("conv_1");
        let result = d.dispatch(&conv, &ToolCall::new("c1", "echo", "{}")).await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Bad tool args"));
    }

    #[tokio::test]
    async fn results_preserve_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(&dir);
        let conv = ConversationId::new("conv_1");
        d.gate().set_mode(&conv, ApprovalMode::AutoApprove);
        let calls = vec![
            ToolCall::new("c1", "echo", r#"{"text":"first"}"#),
            ToolCall::new("c2", "echo", r#"{"text":"second"}"#),
        ];
        let results = d.dispatch_all(&conv, &calls).await;
        let pairs: Vec<_> = results
            .iter()
            .map(|r| (r.tool_call_id.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(pairs, vec![("c1", "first"), ("c2", "second")]);
    }
}
