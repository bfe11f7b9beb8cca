//! Agentic loop against a mock Anthropic endpoint

use bif_engine::prompts::KEEP_TRYING;
use bif_engine::{LogEntry, LoopState, UiEvent};
use serde_json::json;
use wiremock::MockServer;

use crate::common::{
    agent, mount_repeating, mount_replies, mount_status, request_bodies, session, text_reply,
    tool_reply,
};

#[tokio::test]
async fn completes_when_the_reply_carries_the_marker() {
    let server = MockServer::start().await;
    mount_replies(&server, vec![text_reply(&["All ", "done. @task-completed"])]).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);

    let state = session.run("summarise the repo").await;

    assert_eq!(state, LoopState::Completed);
    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    let first = bodies[0]["messages"][0]["content"][0]["text"]
        .as_str()
        .unwrap();
    assert!(first.contains("<task>\nsummarise the repo\n</task>"));
    assert!(bodies[0]["tools"].as_array().is_some_and(|t| t.len() == 9));

    let ai_texts: Vec<_> = session
        .conversation
        .log()
        .entries()
        .iter()
        .filter_map(|(_, entry)| match entry {
            LogEntry::Ai { text, .. } => text.as_deref().map(|t| t.trim().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(ai_texts, vec!["All done.".to_string()]);

    let events = session.drain_ui();
    assert!(events.contains(&UiEvent::StreamDelta {
        conversation: session.conversation.id().clone(),
        text: "All ".into(),
    }));
    assert_eq!(
        events.last(),
        Some(&UiEvent::LoopState {
            conversation: session.conversation.id().clone(),
            state: LoopState::Completed,
        })
    );
}

#[tokio::test]
async fn nudges_until_the_attempt_budget_runs_out() {
    let server = MockServer::start().await;
    mount_repeating(&server, text_reply(&["still thinking"])).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "[app]\nmax_attempts = 2\n");
    let mut session = session(&agent);

    let state = session.run("fix the bug").await;

    assert_eq!(state, LoopState::Completed);
    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    let messages = bodies[1]["messages"].as_array().unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last["role"], "user");
    assert_eq!(last["content"][0]["text"], KEEP_TRYING);
}

#[tokio::test]
async fn read_only_tool_runs_without_approval_and_feeds_back() {
    let server = MockServer::start().await;
    mount_replies(
        &server,
        vec![
            tool_reply("toolu_1", "readFile", &json!({"filePath": "notes.md"})),
            text_reply(&["The notes say hello. @task-completed"]),
        ],
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.md"), "hello from notes").unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);

    let state = session.run("what do the notes say?").await;

    assert_eq!(state, LoopState::Completed);
    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    let second = bodies[1].to_string();
    assert!(second.contains("tool_result"));
    assert!(second.contains("hello from notes"));

    let log = session.conversation.log();
    let results: Vec<_> = log
        .entries()
        .iter()
        .filter_map(|(_, entry)| match entry {
            LogEntry::ToolResult {
                id,
                text,
                is_error,
                ..
            } => Some((id.clone(), text.clone(), *is_error)),
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        vec![("toolu_1".to_string(), "hello from notes".to_string(), false)]
    );
    assert_eq!(
        agent.gate().state("toolu_1"),
        bif_engine::ToolState::Completed
    );
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let server = MockServer::start().await;
    mount_replies(
        &server,
        vec![
            tool_reply("toolu_x", "launchRockets", &json!({})),
            text_reply(&["Sorry. @task-completed"]),
        ],
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);

    assert_eq!(session.run("go").await, LoopState::Completed);

    let bodies = request_bodies(&server).await;
    let second = bodies[1].to_string();
    assert!(second.contains("launchRockets"));
    assert!(second.contains("\"is_error\":true"));
}

#[tokio::test]
async fn provider_failure_ends_the_loop_with_an_error_entry() {
    let server = MockServer::start().await;
    mount_status(&server, 401, "invalid x-api-key").await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);

    let state = session.run("hello").await;

    assert_eq!(state, LoopState::Errored);
    let errors: Vec<_> = session
        .conversation
        .log()
        .entries()
        .iter()
        .filter_map(|(_, entry)| match entry {
            LogEntry::Error { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("401"), "{}", errors[0]);
    assert!(!session.conversation.is_responding());
}
