//! Plain-text rendering of log entries and approval prompts.

use bif_engine::LogEntry;
use bif_types::{ToolIcon, ToolRequestView};

/// Tool output lines echoed to the terminal before eliding the rest.
const RESULT_PREVIEW_LINES: usize = 6;

#[must_use]
pub fn icon_label(icon: Option<ToolIcon>) -> &'static str {
    match icon {
        Some(ToolIcon::Execute) => "[exec]",
        Some(ToolIcon::TestRun) => "[test]",
        Some(ToolIcon::Diff) => "[diff]",
        Some(ToolIcon::Symbol) => "[symbol]",
        Some(ToolIcon::Find) => "[find]",
        Some(ToolIcon::Folder) => "[dir]",
        Some(ToolIcon::Edit) => "[edit]",
        Some(ToolIcon::Preview) => "[read]",
        Some(ToolIcon::Replace) => "[replace]",
        None => "[tool]",
    }
}

fn tool_request_line(request: &ToolRequestView) -> String {
    let args = if request.arguments.trim().is_empty() {
        "{}"
    } else {
        request.arguments.as_str()
    };
    format!(
        "  {} {} {args}  ({})",
        icon_label(request.icon),
        request.name,
        request.id
    )
}

fn preview(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= RESULT_PREVIEW_LINES {
        return lines
            .iter()
            .map(|line| format!("    {line}\n"))
            .collect::<String>();
    }
    let mut out: String = lines[..RESULT_PREVIEW_LINES]
        .iter()
        .map(|line| format!("    {line}\n"))
        .collect();
    out.push_str(&format!(
        "    ... {} more lines\n",
        lines.len() - RESULT_PREVIEW_LINES
    ));
    out
}

/// Text for one log entry, or `None` when nothing needs printing.
///
/// `text_streamed` is set when the entry's assistant text was already shown
/// as it streamed in.
#[must_use]
pub fn entry_text(entry: &LogEntry, text_streamed: bool) -> Option<String> {
    match entry {
        // The user just typed it.
        LogEntry::User { .. } => None,
        LogEntry::System { text } => Some(format!("[system] {text}\n")),
        LogEntry::Ai {
            text,
            tool_requests,
        } => {
            let mut out = String::new();
            if !text_streamed && let Some(text) = text {
                out.push_str(text.trim_end());
                out.push('\n');
            }
            for request in tool_requests {
                out.push_str(&tool_request_line(request));
                out.push('\n');
            }
            (!out.is_empty()).then_some(out)
        }
        LogEntry::ToolResult {
            id,
            tool_name,
            text,
            is_error,
        } => {
            let status = if *is_error { "failed" } else { "ok" };
            Some(format!("  {tool_name} {status} ({id})\n{}", preview(text)))
        }
        LogEntry::Error { text } => Some(format!("error: {text}\n")),
    }
}

/// Prompt shown when a call waits for approval. The request is unknown when
/// the state change outran its log entry.
#[must_use]
pub fn approval_prompt(tool_call_id: &str, request: Option<&ToolRequestView>) -> String {
    match request {
        Some(request) => format!(
            "Approve {} {}? [y/n]  ({tool_call_id})",
            request.name,
            if request.arguments.trim().is_empty() {
                "{}"
            } else {
                request.arguments.as_str()
            }
        ),
        None => format!("Approve tool call {tool_call_id}? [y/n]"),
    }
}

#[cfg(test)]
mod tests {
    use bif_engine::LogEntry;
    use bif_types::{ToolIcon, ToolRequestView};

    use super::{approval_prompt, entry_text};

    fn request() -> ToolRequestView {
        ToolRequestView {
            id: "toolu_1".to_string(),
            name: "runShellCommand".to_string(),
            arguments: r#"{"command":"ls"}"#.to_string(),
            icon: Some(ToolIcon::Execute),
        }
    }

    #[test]
    fn streamed_ai_text_is_not_repeated() {
        let entry = LogEntry::Ai {
            text: Some("Listing files".to_string()),
            tool_requests: vec![request()],
        };
        let shown = entry_text(&entry, true).unwrap();
        assert!(!shown.contains("Listing files"));
        assert!(shown.contains("[exec] runShellCommand {\"command\":\"ls\"}  (toolu_1)"));

        let full = entry_text(&entry, false).unwrap();
        assert!(full.starts_with("Listing files\n"));
    }

    #[test]
    fn user_entries_are_not_echoed() {
        let entry = LogEntry::User {
            text: "hi".to_string(),
        };
        assert_eq!(entry_text(&entry, false), None);
    }

    #[test]
    fn long_tool_output_is_elided() {
        let text = (1..=10).map(|i| format!("line {i}\n")).collect::<String>();
        let entry = LogEntry::ToolResult {
            id: "c1".to_string(),
            tool_name: "readFile".to_string(),
            text,
            is_error: false,
        };
        let shown = entry_text(&entry, false).unwrap();
        assert!(shown.starts_with("  readFile ok (c1)\n"));
        assert!(shown.contains("line 6"));
        assert!(!shown.contains("line 7"));
        assert!(shown.contains("... 4 more lines"));
    }

    #[test]
    fn approval_prompt_names_tool_and_arguments() {
        assert_eq!(
            approval_prompt("toolu_1", Some(&request())),
            "Approve runShellCommand {\"command\":\"ls\"}? [y/n]  (toolu_1)"
        );
        assert_eq!(
            approval_prompt("toolu_2", None),
            "Approve tool call toolu_2? [y/n]"
        );
    }
}
