//! Test runner tool.
//!
//! The test command is a shell template from config, so any build tool works.
//! A failing test run is still a successful tool call: the exit code is part
//! of the result the model reads.

use std::sync::LazyLock;
use std::time::Duration;

use bif_types::{CapabilitySet, ToolCapability, ToolIcon};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::process::run_captured;
use super::{DetectedShell, ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

// The rendered command runs without approval, so nothing the shell would
// expand (`$` included) may reach it.
static TEST_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*(?:#[A-Za-z_][A-Za-z0-9_]*)?$")
        .unwrap_or_else(|e| unreachable!("test reference regex is valid: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestReference {
    class_name: String,
    method_name: Option<String>,
}

impl TestReference {
    /// Parse `com.example.Foo` or `com.example.Foo#bar`.
    fn parse(input: &str) -> Result<Self, ToolError> {
        let input = input.trim();
        if !TEST_REFERENCE.is_match(input) {
            return Err(ToolError::BadArgs {
                message: format!(
                    "Invalid test reference '{input}'. Expected a fully qualified class optionally followed by #methodName"
                ),
            });
        }
        Ok(match input.split_once('#') {
            Some((class, method)) => Self {
                class_name: class.to_string(),
                method_name: Some(method.to_string()),
            },
            None => Self {
                class_name: input.to_string(),
                method_name: None,
            },
        })
    }

    /// Filter form understood by JVM build tools: `Class` or `Class.method`.
    fn target(&self) -> String {
        match &self.method_name {
            Some(method) => format!("{}.{method}", self.class_name),
            None => self.class_name.clone(),
        }
    }

    fn render(&self, template: &str) -> String {
        template
            .replace("{target}", &self.target())
            .replace("{class}", &self.class_name)
            .replace("{method}", self.method_name.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestRunReport {
    class_name: String,
    method_name: Option<String>,
    exit_code: i32,
    output: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTestsArgs {
    test_reference: String,
}

#[derive(Debug)]
pub struct RunTestsTool {
    command_template: String,
    shell: DetectedShell,
    timeout: Duration,
}

impl RunTestsTool {
    #[must_use]
    pub fn new(command_template: String, shell: DetectedShell, timeout: Duration) -> Self {
        Self {
            command_template,
            shell,
            timeout,
        }
    }
}

impl ToolExecutor for RunTestsTool {
    fn name(&self) -> &'static str {
        "runTests"
    }

    fn description(&self) -> &'static str {
        "Run tests for a fully qualified class optionally followed by #methodName. \
         Example: com.example.MyTestClass or com.example.MyTestClass#testSomething"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "testReference": {
                    "type": "string",
                    "description": "Fully qualified test class, optionally followed by #methodName"
                }
            },
            "required": ["testReference"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[ToolCapability::ReadOnly])
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::TestRun)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: RunTestsArgs = parse_args(&args)?;
            let reference = TestReference::parse(&args.test_reference)?;
            let command = reference.render(&self.command_template);
            tracing::info!(%command, "Running tests");

            let cmd = self.shell.command(&command, ctx.project.path());
            let captured = run_captured(cmd, self.name()).await?;
            let report = TestRunReport {
                class_name: reference.class_name,
                method_name: reference.method_name,
                exit_code: captured.exit_code.unwrap_or(-1),
                output: captured.output,
            };
            serde_json::to_string(&report).map_err(|e| ToolError::failed(self.name(), e.to_string()))
        })
    }
}
