//! Approval-gated tools inside a running loop

use std::sync::Arc;

use bif_engine::{ApprovalGate, ApprovalMode, LoopState, ToolState};
use serde_json::json;
use tokio::task::JoinHandle;
use wiremock::MockServer;

use crate::common::{agent, mount_replies, request_bodies, session, text_reply, tool_reply};

/// Answer the first approval request seen on the gate.
fn answer_first_request(gate: &Arc<ApprovalGate>, approve: bool) -> JoinHandle<String> {
    let mut changes = gate.subscribe();
    let gate = Arc::clone(gate);
    tokio::spawn(async move {
        loop {
            let change = changes.recv().await.expect("gate events");
            if change.state == ToolState::WaitingForApproval {
                let decided = if approve {
                    gate.approve(&change.tool_call_id)
                } else {
                    gate.reject(&change.tool_call_id)
                };
                assert!(decided);
                return change.tool_call_id;
            }
        }
    })
}

async fn write_scenario(server: &MockServer) {
    mount_replies(
        server,
        vec![
            tool_reply(
                "toolu_w",
                "writeFile",
                &json!({"filePath": "out/hello.txt", "content": "hi"}),
            ),
            text_reply(&["Finished. @task-completed"]),
        ],
    )
    .await;
}

#[tokio::test]
async fn approved_write_runs_once() {
    let server = MockServer::start().await;
    write_scenario(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);
    let approver = answer_first_request(agent.gate(), true);

    let state = session.run("write a greeting").await;

    assert_eq!(state, LoopState::Completed);
    assert_eq!(approver.await.unwrap(), "toolu_w");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/hello.txt")).unwrap(),
        "hi"
    );
    assert_eq!(agent.gate().state("toolu_w"), ToolState::Completed);
}

#[tokio::test]
async fn rejected_write_never_touches_disk() {
    let server = MockServer::start().await;
    write_scenario(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);
    let approver = answer_first_request(agent.gate(), false);

    let state = session.run("write a greeting").await;

    assert_eq!(state, LoopState::Completed);
    approver.await.unwrap();
    assert!(!dir.path().join("out/hello.txt").exists());
    assert_eq!(agent.gate().state("toolu_w"), ToolState::Rejected);

    let bodies = request_bodies(&server).await;
    let second = bodies[1].to_string();
    assert!(second.contains("Tool execution was rejected: writeFile"));
}

#[tokio::test]
async fn configured_mode_skips_approval_for_writes() {
    let server = MockServer::start().await;
    write_scenario(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(
        &server,
        dir.path(),
        "[app]\napproval_mode = \"ask_for_shell_commands\"\n",
    );
    assert_eq!(agent.default_mode(), ApprovalMode::AskForShellCommands);
    let mut changes = agent.gate().subscribe();
    let mut session = session(&agent);

    assert_eq!(session.run("write a greeting").await, LoopState::Completed);

    let mut states = Vec::new();
    while let Ok(change) = changes.try_recv() {
        states.push(change.state);
    }
    assert_eq!(states, vec![ToolState::Executing, ToolState::Completed]);
    assert!(dir.path().join("out/hello.txt").exists());
}

#[tokio::test]
async fn ending_the_conversation_rejects_waiting_calls() {
    let server = MockServer::start().await;
    write_scenario(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let agent = agent(&server, dir.path(), "");
    let mut session = session(&agent);
    let conversation = session.conversation.id().clone();

    let mut changes = agent.gate().subscribe();
    let ender = {
        let agent = agent.clone();
        tokio::spawn(async move {
            loop {
                let change = changes.recv().await.expect("gate events");
                if change.state == ToolState::WaitingForApproval {
                    agent.end_conversation(&conversation);
                    return;
                }
            }
        })
    };

    assert_eq!(session.run("write a greeting").await, LoopState::Completed);
    ender.await.unwrap();
    assert!(!dir.path().join("out/hello.txt").exists());
    assert_eq!(agent.gate().state("toolu_w"), ToolState::Rejected);
}
