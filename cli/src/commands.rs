//! Slash commands entered at the prompt.

use std::str::FromStr;

use bif_engine::ApprovalMode;

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub label: &'static str,
    pub description: &'static str,
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        label: "mode <always-ask|ask-shell|auto>",
        description: "Show or change the approval mode of this conversation",
    },
    CommandSpec {
        label: "approve [id]",
        description: "Approve a pending tool call (oldest when no id is given)",
    },
    CommandSpec {
        label: "reject [id]",
        description: "Reject a pending tool call (oldest when no id is given)",
    },
    CommandSpec {
        label: "pending",
        description: "List tool calls waiting for approval",
    },
    CommandSpec {
        label: "add <path>",
        description: "Attach a project file as context",
    },
    CommandSpec {
        label: "interrupt",
        description: "Stop automatic continuation of the running loop",
    },
    CommandSpec {
        label: "new",
        description: "End this conversation and start a new one",
    },
    CommandSpec {
        label: "quit",
        description: "Exit (also /q)",
    },
];

#[must_use]
pub fn help_text() -> String {
    let width = COMMAND_SPECS
        .iter()
        .map(|spec| spec.label.len())
        .max()
        .unwrap_or(0);
    let mut out = String::from("Commands:\n");
    for spec in COMMAND_SPECS {
        out.push_str(&format!("  /{:<width$}  {}\n", spec.label, spec.description));
    }
    out.push_str("  y / n answers the oldest pending approval.");
    out
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Command(Command<'a>),
    /// Shorthand answer to the oldest pending approval.
    Answer(bool),
    Message(&'a str),
    Empty,
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        if let Some(raw) = trimmed.strip_prefix('/') {
            return Input::Command(Command::parse(raw));
        }
        match trimmed {
            "y" | "Y" => Input::Answer(true),
            "n" | "N" => Input::Answer(false),
            _ => Input::Message(trimmed),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Mode(Option<Result<ApprovalMode, String>>),
    Approve(Option<&'a str>),
    Reject(Option<&'a str>),
    Pending,
    Add(Option<&'a str>),
    Interrupt,
    New,
    Quit,
    Help,
    Unknown(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let parts: Vec<&str> = raw.split_whitespace().collect();

        match parts.first().copied() {
            Some("mode") => Command::Mode(
                parts
                    .get(1)
                    .map(|arg| ApprovalMode::from_str(arg).map_err(|e| e.to_string())),
            ),
            Some("approve" | "a") => Command::Approve(parts.get(1).copied()),
            Some("reject" | "r") => Command::Reject(parts.get(1).copied()),
            Some("pending") => Command::Pending,
            Some("add") => Command::Add(parts.get(1).copied()),
            Some("interrupt" | "stop") => Command::Interrupt,
            Some("new") => Command::New,
            Some("q" | "quit") => Command::Quit,
            Some("help") => Command::Help,
            Some(cmd) => Command::Unknown(cmd),
            None => Command::Empty,
        }
    }
}
