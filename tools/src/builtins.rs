//! Built-in file tools and the default tool catalog.

use std::sync::Arc;
use std::time::Duration;

use bif_types::{CapabilitySet, ToolCapability, ToolIcon};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, ToolSettings, parse_args};
use crate::git::ShowLocalDiffTool;
use crate::search::{FindClassByNameTool, FindTextInFilesTool};
use crate::shell::{RunShellCommandTool, detect_shell};
use crate::test_runner::RunTestsTool;

const READ_ONLY: CapabilitySet = CapabilitySet::of(&[ToolCapability::ReadOnly]);
const READ_WRITE: CapabilitySet = CapabilitySet::of(&[ToolCapability::ReadWrite]);

fn require_non_blank(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::BadArgs {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

fn io_failure(tool: &str, action: &str, path: &str, err: &std::io::Error) -> ToolError {
    ToolError::failed(tool, format!("failed to {action} '{path}': {err}"))
}

#[derive(Debug)]
pub struct ReadFileTool {
    timeout: Duration,
}

#[derive(Debug)]
pub struct WriteFileTool {
    timeout: Duration,
}

#[derive(Debug)]
pub struct ListFilesTool {
    timeout: Duration,
}

#[derive(Debug)]
pub struct FindReplaceInFileTool {
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileArgs {
    file_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesArgs {
    dir_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindReplaceArgs {
    file_path: String,
    search_text: String,
    replace_text: String,
}

impl ToolExecutor for ReadFileTool {
    fn name(&self) -> &'static str {
        "readFile"
    }

    fn description(&self) -> &'static str {
        "Read the full text of a project file."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": "Path relative to the project root" }
            },
            "required": ["filePath"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        READ_ONLY
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Preview)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = parse_args(&args)?;
            require_non_blank("filePath", &args.file_path)?;
            let path = ctx.project.resolve_existing(&args.file_path)?;
            if path.is_dir() {
                return Err(ToolError::BadArgs {
                    message: format!("'{}' is a directory", args.file_path),
                });
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| io_failure(self.name(), "read", &args.file_path, &e))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    }
}

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &'static str {
        "writeFile"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, replacing it if it exists and creating parent directories as needed."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": "Path relative to the project root" },
                "content": { "type": "string", "description": "Full file content to write" }
            },
            "required": ["filePath", "content"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        READ_WRITE
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Edit)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: WriteFileArgs = parse_args(&args)?;
            require_non_blank("filePath", &args.file_path)?;
            let path = ctx.project.resolve_for_create(&args.file_path)?;
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_failure(self.name(), "create directories for", &args.file_path, &e))?;
            }
            tokio::fs::write(&path, args.content.as_bytes())
                .await
                .map_err(|e| io_failure(self.name(), "write", &args.file_path, &e))?;
            tracing::debug!(path = %path.display(), bytes = args.content.len(), "Wrote file");
            Ok("ok".to_string())
        })
    }
}

impl ToolExecutor for ListFilesTool {
    fn name(&self) -> &'static str {
        "listFiles"
    }

    fn description(&self) -> &'static str {
        "List the direct children of a project directory."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirPath": { "type": "string", "description": "Directory relative to the project root; \".\" for the root" }
            },
            "required": ["dirPath"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        READ_ONLY
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Folder)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: ListFilesArgs = parse_args(&args)?;
            let dir_path = if args.dir_path.trim().is_empty() {
                "."
            } else {
                args.dir_path.as_str()
            };
            let dir = ctx.project.resolve_existing(dir_path)?;
            if !dir.is_dir() {
                return Err(ToolError::BadArgs {
                    message: "Path is not a directory".to_string(),
                });
            }
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_failure(self.name(), "list", dir_path, &e))?;
            let mut children = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_failure(self.name(), "list", dir_path, &e))?
            {
                children.push(ctx.project.relative_display(&entry.path()));
            }
            children.sort();
            Ok(children.join("\n"))
        })
    }
}

impl ToolExecutor for FindReplaceInFileTool {
    fn name(&self) -> &'static str {
        "findReplaceInFile"
    }

    fn description(&self) -> &'static str {
        "Replace every occurrence of an exact piece of text in a file."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": { "type": "string", "description": "Path relative to the project root" },
                "searchText": { "type": "string", "description": "Exact text to find" },
                "replaceText": { "type": "string", "description": "Replacement text" }
            },
            "required": ["filePath", "searchText", "replaceText"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        READ_WRITE
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Replace)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: FindReplaceArgs = parse_args(&args)?;
            require_non_blank("filePath", &args.file_path)?;
            if args.search_text.is_empty() {
                return Err(ToolError::BadArgs {
                    message: "searchText must not be empty".to_string(),
                });
            }
            let path = ctx.project.resolve_existing(&args.file_path)?;
            let original = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_failure(self.name(), "read", &args.file_path, &e))?;
            let count = original.matches(&args.search_text).count();
            if count > 0 {
                let updated = original.replace(&args.search_text, &args.replace_text);
                tokio::fs::write(&path, updated)
                    .await
                    .map_err(|e| io_failure(self.name(), "write", &args.file_path, &e))?;
            }
            Ok(format!("Made {count} replacements."))
        })
    }
}

/// The default tool catalog.
#[must_use]
pub fn builtin_tools(settings: &ToolSettings) -> Vec<Arc<dyn ToolExecutor>> {
    let timeouts = settings.timeouts;
    let shell = detect_shell(Some(&settings.shell));
    vec![
        Arc::new(ReadFileTool {
            timeout: timeouts.default,
        }),
        Arc::new(WriteFileTool {
            timeout: timeouts.default,
        }),
        Arc::new(ListFilesTool {
            timeout: timeouts.default,
        }),
        Arc::new(FindReplaceInFileTool {
            timeout: timeouts.default,
        }),
        Arc::new(FindTextInFilesTool::new(
            settings.max_search_results,
            timeouts.search,
        )),
        Arc::new(FindClassByNameTool::new(timeouts.search)),
        Arc::new(ShowLocalDiffTool::new(timeouts.default)),
        Arc::new(RunTestsTool::new(
            settings.test_command.clone(),
            shell.clone(),
            timeouts.tests,
        )),
        Arc::new(RunShellCommandTool::new(shell, timeouts.shell)),
    ]
}

pub fn builtin_registry(settings: &ToolSettings) -> Result<ToolRegistry, ToolError> {
    ToolRegistry::from_tools(builtin_tools(settings))
}
