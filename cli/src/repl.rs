//! Line-oriented front end: reads stdin, prints streamed model output and
//! asks for tool approvals.

use std::collections::HashMap;
use std::io::{Stdout, Write, stdout};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, broadcast, mpsc};

use bif_engine::{
    Agent, AgenticLoop, ApprovalMode, Conversation, ConversationId, LogEntry, LoopState,
    RecentFiles, ToolState, ToolStateChange, UiEvent,
};
use bif_types::ToolRequestView;

use crate::commands::{Command, Input, help_text};
use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Quit,
}

pub struct Repl<W = Stdout> {
    agent: Agent,
    recent: Arc<RecentFiles>,
    conversation: Arc<Mutex<Conversation>>,
    conversation_id: ConversationId,
    /// Interrupt handle of the loop currently running, if any.
    running: Option<AgenticLoop>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    /// Tool requests seen in this conversation, for approval prompts.
    requests: HashMap<String, ToolRequestView>,
    /// A partial line of streamed text is on screen.
    streaming: bool,
    /// The next assistant entry's text was already streamed.
    text_shown: bool,
    out: W,
}

impl Repl<Stdout> {
    pub fn new(agent: Agent, recent: Arc<RecentFiles>) -> Self {
        Self::with_output(agent, recent, stdout())
    }
}

impl<W: Write> Repl<W> {
    pub(crate) fn with_output(agent: Agent, recent: Arc<RecentFiles>, out: W) -> Self {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let conversation = agent.start_conversation(ui_tx.clone());
        Self {
            conversation_id: conversation.id().clone(),
            conversation: Arc::new(Mutex::new(conversation)),
            agent,
            recent,
            running: None,
            ui_tx,
            ui_rx,
            requests: HashMap::new(),
            streaming: false,
            text_shown: false,
            out,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        writeln!(
            self.out,
            "bif {} using {} (mode {}). Type /help for commands.",
            env!("CARGO_PKG_VERSION"),
            self.agent.model_name(),
            self.agent.gate().mode(&self.conversation_id)
        )?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut changes = self.agent.gate().subscribe();

        loop {
            tokio::select! {
                biased;
                Some(event) = self.ui_rx.recv() => self.on_ui_event(event)?,
                change = changes.recv() => match change {
                    Ok(change) => self.on_state_change(&change)?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Tool state events lagged");
                        self.show_pending()?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if self.handle_line(&line)? == Flow::Quit {
                        break;
                    }
                }
            }
        }

        self.end_current();
        Ok(())
    }

    pub(crate) fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match Input::parse(line) {
            Input::Empty => {}
            Input::Message(text) => self.send(text)?,
            Input::Answer(approved) => self.decide(None, approved)?,
            Input::Command(command) => return self.handle_command(command),
        }
        Ok(Flow::Continue)
    }

    fn handle_command(&mut self, command: Command<'_>) -> Result<Flow> {
        match command {
            Command::Mode(None) => {
                let mode = self.agent.gate().mode(&self.conversation_id);
                writeln!(self.out, "Approval mode: {mode}")?;
            }
            Command::Mode(Some(Ok(mode))) => self.set_mode(mode)?,
            Command::Mode(Some(Err(message))) => writeln!(self.out, "{message}")?,
            Command::Approve(id) => self.decide(id, true)?,
            Command::Reject(id) => self.decide(id, false)?,
            Command::Pending => self.show_pending()?,
            Command::Add(None) => writeln!(self.out, "Usage: /add <path>")?,
            Command::Add(Some(path)) => match self.agent.project().resolve_existing(path) {
                Ok(_) => {
                    self.recent.open(PathBuf::from(path));
                    writeln!(self.out, "Added {path} to the context.")?;
                }
                Err(e) => writeln!(self.out, "{e}")?,
            },
            Command::Interrupt => match &self.running {
                Some(control) => {
                    control.interrupt();
                    writeln!(
                        self.out,
                        "Interrupt requested; the loop stops after the current step."
                    )?;
                }
                None => writeln!(self.out, "Nothing is running.")?,
            },
            Command::New => {
                self.end_current();
                let conversation = self.agent.start_conversation(self.ui_tx.clone());
                self.conversation_id = conversation.id().clone();
                self.conversation = Arc::new(Mutex::new(conversation));
                self.recent.clear();
                writeln!(self.out, "Started {}.", self.conversation_id)?;
            }
            Command::Quit => return Ok(Flow::Quit),
            Command::Help | Command::Empty => writeln!(self.out, "{}", help_text())?,
            Command::Unknown(name) => {
                writeln!(self.out, "Unknown command /{name}. Type /help for commands.")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn send(&mut self, text: &str) -> Result<()> {
        if self.running.is_some() {
            writeln!(
                self.out,
                "A loop is already running. Wait for it to finish or /interrupt it."
            )?;
            return Ok(());
        }

        let control = AgenticLoop::new();
        let task_control = control.clone();
        let conversation = Arc::clone(&self.conversation);
        let message = text.to_string();
        tokio::spawn(async move {
            let mut conversation = conversation.lock().await;
            conversation
                .run_agentic_loop(&message, None, &task_control)
                .await
        });
        self.running = Some(control);
        Ok(())
    }

    fn set_mode(&mut self, mode: ApprovalMode) -> Result<()> {
        self.agent.gate().set_mode(&self.conversation_id, mode);
        writeln!(self.out, "Approval mode set to {mode}.")?;
        Ok(())
    }

    /// Resolve `id`, or the oldest pending call when no id is given.
    fn decide(&mut self, id: Option<&str>, approved: bool) -> Result<()> {
        let gate = Arc::clone(self.agent.gate());
        let id = match id {
            Some(id) => id.to_string(),
            None => match gate
                .pending_approvals_for(&self.conversation_id)
                .into_iter()
                .next()
            {
                Some(id) => id,
                None => {
                    writeln!(self.out, "No tool call is waiting for approval.")?;
                    return Ok(());
                }
            },
        };

        let decided = if approved {
            gate.approve(&id)
        } else {
            gate.reject(&id)
        };
        match (decided, approved) {
            (true, true) => writeln!(self.out, "Approved {id}.")?,
            (true, false) => writeln!(self.out, "Rejected {id}.")?,
            (false, _) => writeln!(self.out, "No pending approval for {id}.")?,
        }
        Ok(())
    }

    fn show_pending(&mut self) -> Result<()> {
        let pending = self
            .agent
            .gate()
            .pending_approvals_for(&self.conversation_id);
        if pending.is_empty() {
            writeln!(self.out, "No tool call is waiting for approval.")?;
        }
        for id in pending {
            writeln!(
                self.out,
                "{}",
                render::approval_prompt(&id, self.requests.get(&id))
            )?;
        }
        Ok(())
    }

    fn end_current(&mut self) {
        if let Some(control) = self.running.take() {
            control.interrupt();
        }
        self.agent.end_conversation(&self.conversation_id);
        self.requests.clear();
        self.streaming = false;
        self.text_shown = false;
    }

    pub(crate) fn on_ui_event(&mut self, event: UiEvent) -> Result<()> {
        // A loop from an ended conversation may still be winding down.
        if event.conversation() != &self.conversation_id {
            return Ok(());
        }

        match event {
            UiEvent::StreamDelta { text, .. } => {
                write!(self.out, "{text}")?;
                self.out.flush()?;
                self.streaming = true;
            }
            UiEvent::StreamCleared { .. } => {
                if self.streaming {
                    writeln!(self.out)?;
                    self.streaming = false;
                    self.text_shown = true;
                }
            }
            UiEvent::Entry { entry, .. } => {
                if let LogEntry::Ai { tool_requests, .. } = &entry {
                    for request in tool_requests {
                        self.requests.insert(request.id.clone(), request.clone());
                    }
                }
                let text_shown = matches!(entry, LogEntry::Ai { .. }) && self.text_shown;
                self.text_shown = false;
                if let Some(text) = render::entry_text(&entry, text_shown) {
                    write!(self.out, "{text}")?;
                }
            }
            UiEvent::Responding { responding, .. } => {
                if !responding {
                    self.running = None;
                }
            }
            UiEvent::LoopState { state, .. } => match state {
                LoopState::Interrupted => writeln!(self.out, "[interrupted]")?,
                LoopState::Errored => writeln!(self.out, "[stopped after an error]")?,
                _ => {}
            },
        }
        self.out.flush()?;
        Ok(())
    }

    pub(crate) fn on_state_change(&mut self, change: &ToolStateChange) -> Result<()> {
        if change.conversation_id.as_ref() != Some(&self.conversation_id) {
            return Ok(());
        }
        if change.state == ToolState::WaitingForApproval {
            if self.streaming {
                writeln!(self.out)?;
                self.streaming = false;
            }
            writeln!(
                self.out,
                "{}",
                render::approval_prompt(&change.tool_call_id, self.requests.get(&change.tool_call_id))
            )?;
            self.out.flush()?;
        }
        Ok(())
    }
}
