//! Prompt templates and the completion-marker protocol.
//!
//! The first message of a conversation is wrapped in the task prompt, which
//! embeds editor context and asks the model to finish with
//! [`COMPLETION_MARKER`]. Display code strips both back out.

use std::path::Path;
use std::sync::LazyLock;

use bif_types::QueryContext;
use regex::Regex;

/// Literal token the model emits in its final turn.
pub const COMPLETION_MARKER: &str = "@task-completed";

/// Sent when a turn ends without the marker.
pub const KEEP_TRYING: &str =
    "keep trying, and make sure to include the @task-completed when the response is final.";

/// Bytes of file content embedded in the first prompt.
pub const DEFAULT_CONTEXT_BUDGET_BYTES: usize = 64 * 1024;

pub const SYSTEM_PROMPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/system_prompt.md"));

static TASK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task>(.*?)</task>").expect("valid task tag regex"));

const CONTEXT_PREAMBLE: &str = "\
The IDE has provided the following context that might be helpful to you. It may include:
* selection - the text that is currently selected in the editor
* relevant files - the files the user recently opened and the files behind the selection";

/// Render the first message of a conversation.
///
/// Relative paths in `ctx` resolve against `project_root`. Files are embedded
/// in order while the rendered context is under `budget_bytes`; a file that
/// cannot be read is skipped.
pub async fn render_conversation_prompt(
    task: &str,
    ctx: &QueryContext,
    project_root: &Path,
    budget_bytes: usize,
) -> String {
    let context = render_context(ctx, project_root, budget_bytes).await;

    let mut prompt = String::from(
        "You are given the following task to complete.\n\
         If the task is a question, answer it directly. If the task is a direction,\n\
         then execute it using the tools at your disposal.\n",
    );
    prompt.push_str("<task>\n");
    prompt.push_str(task);
    prompt.push_str("\n</task>\n\n");
    if !context.is_empty() {
        prompt.push_str(CONTEXT_PREAMBLE);
        prompt.push_str("\n<context>\n");
        prompt.push_str(&context);
        prompt.push_str("</context>\n");
    }
    prompt.push_str(&format!(
        "Once you have completed the task, respond with \"{COMPLETION_MARKER}\"."
    ));
    prompt
}

async fn render_context(ctx: &QueryContext, project_root: &Path, budget_bytes: usize) -> String {
    let mut out = String::new();

    if let Some(selection) = ctx.selection.as_deref().filter(|s| !s.is_empty()) {
        out.push_str("<selection>\n");
        out.push_str(selection);
        out.push_str("\n</selection>\n");
    }

    let files = ctx.relevant_files();
    if files.is_empty() {
        return out;
    }

    let mut included = 0usize;
    let mut section = String::from("<relevant_files>\n");
    for file in files {
        if out.len() + section.len() >= budget_bytes {
            tracing::debug!(budget_bytes, included, "Context budget reached");
            break;
        }
        let path = project_root.join(&file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                section.push_str(&format!("<file path=\"{}\">\n", file.display()));
                section.push_str(&content);
                if !content.ends_with('\n') {
                    section.push('\n');
                }
                section.push_str("</file>\n");
                included += 1;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), "Skipping unreadable context file: {err}");
            }
        }
    }
    if included > 0 {
        section.push_str("</relevant_files>\n");
        out.push_str(&section);
    }
    out
}

/// Recover the user's task from a rendered prompt. Text without a task block
/// is returned unchanged.
#[must_use]
pub fn unprompt_user_message(prompt: &str) -> String {
    TASK_TAG
        .captures(prompt)
        .and_then(|caps| caps.get(1))
        .map_or_else(|| prompt.to_string(), |task| task.as_str().trim().to_string())
}

/// Strip every completion marker for display.
#[must_use]
pub fn unprompt_ai_message(text: &str) -> String {
    text.replace(COMPLETION_MARKER, "")
}

#[must_use]
pub fn contains_completion_marker(text: &str) -> bool {
    text.contains(COMPLETION_MARKER)
}
