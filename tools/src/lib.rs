//! Tool runtime - registry, approval gate, invocation envelope and built-in tools.
//!
//! A model tool call flows through this crate as:
//!
//! ```text
//! ToolCall -> ToolDispatcher -> ToolRegistry::lookup -> validate_args
//!          -> ToolInvoker (ApprovalGate wait, deadline, output normalisation)
//!          -> ToolExecutor::execute -> ToolResult
//! ```

pub mod approval;
pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod git;
pub mod invoker;
pub mod process;
pub mod project;
pub mod search;
pub mod shell;
pub mod test_runner;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bif_types::{CapabilitySet, ToolDefinition, ToolIcon};
use serde_json::Value;

pub use approval::{ApprovalGate, ToolStateChange};
pub use config::{ToolSettings, ToolTimeouts};
pub use dispatch::ToolDispatcher;
pub use invoker::{DispatchContext, ToolInvoker};
pub use project::ProjectRoot;
pub use shell::DetectedShell;

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Substituted for blank tool output. Providers treat an empty tool result as
/// a stalled call, so a tool result is never empty.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "the tool completed without any output.";

/// Deadline for tools that do not declare their own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool execution was rejected: {tool}")]
    Rejected { tool: String },
    #[error("Tool {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
    #[error("Tool {tool} failed: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ToolError {
    pub(crate) fn failed(tool: &str, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Per-call context handed to a tool body.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub project: ProjectRoot,
    pub tool_call_id: String,
}

/// A self-contained invocable tool.
pub trait ToolExecutor: Send + Sync {
    /// Stable name the model uses to call the tool.
    fn name(&self) -> &'static str;
    /// Tells the model when to call the tool.
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn schema(&self) -> Value;
    /// What the tool needs permission to do.
    fn capabilities(&self) -> CapabilitySet;
    fn icon(&self) -> Option<ToolIcon> {
        None
    }
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// The fixed catalog of invocable tools.
///
/// Names are unique; registering a second tool under an existing name is a
/// configuration error rather than a silent replacement.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<&'static str, Arc<dyn ToolExecutor>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.executors.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Build a registry from a static registration list.
    pub fn from_tools(
        tools: impl IntoIterator<Item = Arc<dyn ToolExecutor>>,
    ) -> Result<Self, ToolError> {
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) -> Result<(), ToolError> {
        let name = executor.name();
        if self.executors.contains_key(name) {
            return Err(ToolError::DuplicateTool {
                name: name.to_string(),
            });
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn ToolExecutor>, ToolError> {
        self.find_by_name(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn icon_for(&self, name: &str) -> Option<ToolIcon> {
        self.executors.get(name).and_then(|tool| tool.icon())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Tool definitions advertised to the model, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .executors
            .values()
            .map(|exec| ToolDefinition::new(exec.name(), exec.description(), exec.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use bif_types::{CapabilitySet, ToolCapability};
    use serde_json::{Value, json};

    use super::{ToolCtx, ToolExecutor, ToolFut};

    /// Minimal tool that echoes its `text` argument.
    pub(crate) struct EchoTool {
        pub(crate) name: &'static str,
        pub(crate) caps: CapabilitySet,
    }

    impl EchoTool {
        pub(crate) fn read_only(name: &'static str) -> Self {
            Self {
                name,
                caps: CapabilitySet::of(&[ToolCapability::ReadOnly]),
            }
        }
    }

    impl ToolExecutor for EchoTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "Echo the provided text."
        }

        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        fn capabilities(&self) -> CapabilitySet {
            self.caps
        }

        fn execute<'a>(&'a self, args: Value, _ctx: &'a ToolCtx) -> ToolFut<'a> {
            Box::pin(async move {
                Ok(args
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string())
            })
        }
    }
}
