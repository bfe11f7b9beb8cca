use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bif_tools::{
    ApprovalGate, ProjectRoot, ToolCtx, ToolDispatcher, ToolExecutor, ToolFut, ToolRegistry,
};
use bif_types::{
    ApprovalMode, CapabilitySet, ChatMessage, ConversationId, LogEntry, QueryContext, StreamEvent,
    ToolCapability, ToolState,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{AgenticLoop, Conversation, LoopSettings, LoopState, UiEvent};
use crate::context::{ContextCollector, NoContext, RecentFiles};
use crate::model::{ModelClient, ModelFut, ModelRequest};
use crate::prompts::KEEP_TRYING;

/// Replays one scripted event list per request and records what was sent.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(replies: impl IntoIterator<Item = Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::default(),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[index].clone()
    }
}

impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn stream<'a>(
        &'a self,
        request: ModelRequest<'a>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> ModelFut<'a> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        let events = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![StreamEvent::Error("script exhausted".to_string())]);
        Box::pin(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        })
    }
}

struct UnreachableModel;

impl ModelClient for UnreachableModel {
    fn model_name(&self) -> &str {
        "unreachable"
    }

    fn stream<'a>(
        &'a self,
        _request: ModelRequest<'a>,
        _tx: mpsc::Sender<StreamEvent>,
    ) -> ModelFut<'a> {
        Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
    }
}

fn text(reply: &str) -> Vec<StreamEvent> {
    vec![StreamEvent::TextDelta(reply.to_string()), StreamEvent::Done]
}

fn calls(calls: &[(&str, &str)]) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for (id, arguments) in calls {
        events.push(StreamEvent::ToolCallStart {
            id: (*id).to_string(),
            name: "record".to_string(),
        });
        events.push(StreamEvent::ToolCallDelta {
            id: (*id).to_string(),
            arguments: (*arguments).to_string(),
        });
    }
    events.push(StreamEvent::Done);
    events
}

struct RecordingTool {
    caps: CapabilitySet,
    runs: Arc<AtomicUsize>,
}

impl ToolExecutor for RecordingTool {
    fn name(&self) -> &'static str {
        "record"
    }

    fn description(&self) -> &'static str {
        "Record the call."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    fn execute<'a>(&'a self, args: Value, _ctx: &'a ToolCtx) -> ToolFut<'a> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let text = args.get("text").and_then(Value::as_str).unwrap_or("none");
            Ok(format!("recorded {text}"))
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    gate: Arc<ApprovalGate>,
    runs: Arc<AtomicUsize>,
    ui: mpsc::UnboundedReceiver<UiEvent>,
}

impl Fixture {
    fn drain_ui(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            events.push(event);
        }
        events
    }
}

fn conversation_with(
    model: Arc<dyn ModelClient>,
    settings: LoopSettings,
    caps: &[ToolCapability],
    collector: Arc<dyn ContextCollector>,
) -> (Conversation, Fixture) {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let tool = RecordingTool {
        caps: CapabilitySet::of(caps),
        runs: Arc::clone(&runs),
    };
    let registry = ToolRegistry::from_tools([Arc::new(tool) as Arc<dyn ToolExecutor>]).unwrap();
    let gate = Arc::new(ApprovalGate::new());
    let dispatcher = ToolDispatcher::new(
        Arc::new(registry),
        Arc::clone(&gate),
        ProjectRoot::new(dir.path()).unwrap(),
    );
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let conversation = Conversation::new(
        ConversationId::new("conv_test"),
        model,
        dispatcher,
        collector,
        settings,
        ui_tx,
    );
    let fixture = Fixture {
        _dir: dir,
        gate,
        runs,
        ui: ui_rx,
    };
    (conversation, fixture)
}

fn conversation(model: Arc<dyn ModelClient>, settings: LoopSettings) -> (Conversation, Fixture) {
    conversation_with(
        model,
        settings,
        &[ToolCapability::ReadOnly],
        Arc::new(NoContext),
    )
}

fn budget(max_attempts: u32) -> LoopSettings {
    LoopSettings {
        max_attempts,
        ..LoopSettings::default()
    }
}

fn user_texts(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::User(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn marker_in_first_reply_completes_after_one_request() {
    let model = ScriptedModel::new([text("All done. @task-completed")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(5));

    let state = conv.run_agentic_loop("hello", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(conv.state(), LoopState::Completed);
    assert_eq!(model.request_count(), 1);
    assert!(!conv.is_responding());
}

#[tokio::test]
async fn missing_marker_issues_budget_minus_one_continuations() {
    let model = ScriptedModel::new([text("one"), text("two"), text("three"), text("four")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(3));

    let state = conv.run_agentic_loop("task", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(model.request_count(), 3);
    let sent = user_texts(&model.request(2));
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1], KEEP_TRYING);
    assert_eq!(sent[2], KEEP_TRYING);
}

#[tokio::test]
async fn marker_stops_continuations_early() {
    let model = ScriptedModel::new([text("working"), text("finished @task-completed"), text("x")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(25));

    let state = conv.run_agentic_loop("task", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(model.request_count(), 2);
}

#[tokio::test]
async fn interrupt_before_start_prevents_continuation() {
    let model = ScriptedModel::new([text("no marker"), text("never sent")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(25));
    let control = AgenticLoop::new();
    control.interrupt();

    let state = conv.run_agentic_loop("task", None, &control).await;

    assert_eq!(state, LoopState::Interrupted);
    assert_eq!(model.request_count(), 1);
}

#[tokio::test]
async fn interrupt_on_the_last_attempt_reads_interrupted() {
    let model = ScriptedModel::new([text("no marker")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(1));
    let control = AgenticLoop::new();
    control.interrupt();

    let state = conv.run_agentic_loop("task", None, &control).await;

    assert_eq!(state, LoopState::Interrupted);
    assert_eq!(conv.state(), LoopState::Interrupted);
    assert_eq!(model.request_count(), 1);
}

#[tokio::test]
async fn every_tool_call_gets_exactly_one_result() {
    let model = ScriptedModel::new([
        calls(&[("a", r#"{"text":"first"}"#), ("b", r#"{"text":"second"}"#)]),
        text("both ran @task-completed"),
    ]);
    let (mut conv, fx) = conversation(model.clone(), budget(5));

    let state = conv.run_agentic_loop("run both", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(fx.runs.load(Ordering::SeqCst), 2);
    assert_eq!(conv.log().results_for("a").count(), 1);
    assert_eq!(conv.log().results_for("b").count(), 1);
    assert!(matches!(
        conv.log().results_for("a").next(),
        Some(LogEntry::ToolResult { text, is_error: false, .. }) if text == "recorded first"
    ));

    // The follow-up request carries both results after the assistant turn.
    let follow_up = model.request(1);
    let result_ids: Vec<&str> = follow_up
        .iter()
        .filter_map(|m| match m {
            ChatMessage::ToolResult(r) => Some(r.tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, vec!["a", "b"]);
    assert_eq!(fx.gate.state("a"), ToolState::Completed);
}

#[tokio::test]
async fn rejected_call_is_reported_and_loop_continues() {
    let model = ScriptedModel::new([
        calls(&[("w1", r#"{"text":"edit"}"#)]),
        text("understood @task-completed"),
    ]);
    let (mut conv, fx) = conversation_with(
        model.clone(),
        budget(5),
        &[ToolCapability::ReadWrite],
        Arc::new(NoContext),
    );
    conv.dispatcher()
        .gate()
        .set_mode(conv.id(), ApprovalMode::AlwaysAsk);

    let gate = Arc::clone(&fx.gate);
    let mut changes = gate.subscribe();
    let reviewer = tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            if change.state == ToolState::WaitingForApproval {
                assert!(gate.reject(&change.tool_call_id));
                return change.tool_call_id;
            }
        }
        String::new()
    });

    let state = conv.run_agentic_loop("edit it", None, &AgenticLoop::new()).await;

    assert_eq!(reviewer.await.unwrap(), "w1");
    assert_eq!(state, LoopState::Completed);
    assert_eq!(fx.runs.load(Ordering::SeqCst), 0);
    assert_eq!(fx.gate.state("w1"), ToolState::Rejected);
    match conv.log().results_for("w1").next() {
        Some(LogEntry::ToolResult { text, is_error, .. }) => {
            assert!(*is_error);
            assert!(text.contains("rejected"), "{text}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(model.request_count(), 2);
}

#[tokio::test]
async fn auto_approve_runs_without_waiting() {
    let model = ScriptedModel::new([
        calls(&[("w1", r#"{"text":"edit"}"#)]),
        text("done @task-completed"),
    ]);
    let (mut conv, fx) = conversation_with(
        model,
        budget(5),
        &[ToolCapability::ReadWrite],
        Arc::new(NoContext),
    );
    fx.gate.set_mode(conv.id(), ApprovalMode::AutoApprove);
    let mut changes = fx.gate.subscribe();

    let state = conv.run_agentic_loop("edit it", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change.state);
    }
    assert_eq!(seen, vec![ToolState::Executing, ToolState::Completed]);
}

#[tokio::test]
async fn model_failure_appends_error_entry() {
    let (mut conv, _fx) = conversation(Arc::new(UnreachableModel), budget(5));

    let state = conv.run_agentic_loop("hello", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Errored);
    assert!(!conv.is_responding());
    match &conv.log().entries().last().unwrap().1 {
        LogEntry::Error { text } => assert!(text.contains("connection refused"), "{text}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn provider_error_event_stops_the_loop() {
    let model = ScriptedModel::new([vec![
        StreamEvent::TextDelta("partial".to_string()),
        StreamEvent::Error("API error 401: bad key".to_string()),
    ]]);
    let (mut conv, _fx) = conversation(model.clone(), budget(5));

    let state = conv.run_agentic_loop("hello", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Errored);
    assert_eq!(model.request_count(), 1);
    assert!(conv.incomplete_message().is_empty());
}

#[tokio::test]
async fn tool_iteration_limit_errors_with_paired_results() {
    let model = ScriptedModel::new([
        calls(&[("c1", "{}")]),
        calls(&[("c2", "{}")]),
        text("never"),
    ]);
    let settings = LoopSettings {
        max_tool_iterations: 1,
        ..budget(5)
    };
    let (mut conv, fx) = conversation(model.clone(), settings);

    let state = conv.run_agentic_loop("loop", None, &AgenticLoop::new()).await;

    assert_eq!(state, LoopState::Errored);
    assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
    assert_eq!(model.request_count(), 2);
    assert_eq!(conv.log().results_for("c2").count(), 1);
    assert!(matches!(
        conv.log().entries().last().map(|(_, e)| e),
        Some(LogEntry::Error { text }) if text.contains("Tool iteration limit")
    ));
}

#[tokio::test]
async fn only_the_first_message_uses_the_task_prompt() {
    let model = ScriptedModel::new([text("a @task-completed"), text("b @task-completed")]);
    let (mut conv, _fx) = conversation(model.clone(), budget(5));

    conv.run_agentic_loop("first task", None, &AgenticLoop::new())
        .await;
    conv.run_agentic_loop("second", None, &AgenticLoop::new())
        .await;

    let sent = user_texts(&model.request(1));
    assert!(sent[0].contains("<task>\nfirst task\n</task>"));
    assert_eq!(sent[1], "second");
    assert_eq!(
        conv.log().entries()[0].1,
        LogEntry::User {
            text: "first task".to_string()
        }
    );
}

#[tokio::test]
async fn supplied_and_collected_context_accumulate() {
    let recent = Arc::new(RecentFiles::new());
    recent.open("Collected.java");
    let model = ScriptedModel::new([text("@task-completed"), text("@task-completed")]);
    let (mut conv, _fx) = conversation_with(
        model,
        budget(5),
        &[ToolCapability::ReadOnly],
        recent,
    );
    let supplied = QueryContext {
        selection: Some("foo()".to_string()),
        ..QueryContext::with_recent_files(vec![PathBuf::from("Supplied.java")])
    };

    conv.run_agentic_loop("t", Some(supplied), &AgenticLoop::new())
        .await;
    conv.run_agentic_loop("again", None, &AgenticLoop::new())
        .await;

    assert_eq!(
        conv.context().recent_files,
        vec![PathBuf::from("Supplied.java"), PathBuf::from("Collected.java")]
    );
    assert_eq!(conv.context().selection.as_deref(), Some("foo()"));
}

#[tokio::test]
async fn streamed_text_is_cleared_before_the_entry_lands() {
    let model = ScriptedModel::new([vec![
        StreamEvent::TextDelta("Hel".to_string()),
        StreamEvent::TextDelta("lo @task-completed".to_string()),
        StreamEvent::Done,
    ]]);
    let (mut conv, mut fx) = conversation(model, budget(5));

    conv.run_agentic_loop("hi", None, &AgenticLoop::new()).await;
    let events = fx.drain_ui();

    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            UiEvent::StreamDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo @task-completed"]);

    let cleared = events
        .iter()
        .position(|e| matches!(e, UiEvent::StreamCleared { .. }))
        .unwrap();
    let ai_entry = events
        .iter()
        .position(|e| {
            matches!(
                e,
                UiEvent::Entry {
                    entry: LogEntry::Ai { .. },
                    ..
                }
            )
        })
        .unwrap();
    assert!(cleared < ai_entry);
    assert!(matches!(
        events.last(),
        Some(UiEvent::LoopState {
            state: LoopState::Completed,
            ..
        })
    ));
    assert!(events.contains(&UiEvent::Responding {
        conversation: ConversationId::new("conv_test"),
        responding: true,
    }));
}

#[tokio::test]
async fn entries_after_the_loop_are_not_forwarded() {
    let model = ScriptedModel::new([text("@task-completed")]);
    let (mut conv, mut fx) = conversation(model, budget(5));
    conv.run_agentic_loop("hi", None, &AgenticLoop::new()).await;
    fx.drain_ui();

    conv.log.push_error("after");

    assert!(fx.drain_ui().is_empty());
}
