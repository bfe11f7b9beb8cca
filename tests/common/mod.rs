//! Shared test utilities and fixtures
//!
//! A wiremock server standing in for the Anthropic Messages API, plus an
//! agent wired to it.

#![allow(dead_code)]

use std::path::Path;

use bif_engine::{
    Agent, AgenticLoop, ApiConfig, BifConfig, Conversation, LoopState, Provider, UiEvent,
};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_event(payload: &serde_json::Value) -> String {
    let kind = payload["type"].as_str().unwrap_or("message");
    format!("event: {kind}\ndata: {payload}\n\n")
}

fn wrap(blocks: &[serde_json::Value]) -> String {
    let mut body = sse_event(&json!({"type": "message_start", "message": {}}));
    for block in blocks {
        body.push_str(&sse_event(block));
    }
    body.push_str(&sse_event(&json!({"type": "message_stop"})));
    body
}

/// A streamed reply made of text deltas.
pub fn text_reply(chunks: &[&str]) -> String {
    let mut blocks = vec![json!({
        "type": "content_block_start",
        "index": 0,
        "content_block": {"type": "text", "text": ""}
    })];
    for chunk in chunks {
        blocks.push(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": chunk}
        }));
    }
    blocks.push(json!({"type": "content_block_stop", "index": 0}));
    wrap(&blocks)
}

/// A streamed reply requesting one tool call.
pub fn tool_reply(id: &str, name: &str, arguments: &serde_json::Value) -> String {
    wrap(&[
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
        }),
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": arguments.to_string()}
        }),
        json!({"type": "content_block_stop", "index": 0}),
    ])
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

/// Serve `bodies` in order, one per request.
pub async fn mount_replies(server: &MockServer, bodies: Vec<String>) {
    for body in bodies {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(sse_response(body))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

/// Serve `body` for every request.
pub async fn mount_repeating(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

pub fn claude_config(server: &MockServer) -> ApiConfig {
    ApiConfig::new(Provider::Anthropic, "test-key", "claude-sonnet-4-5")
        .expect("valid api config")
        .with_base_url(format!("{}/v1", server.uri()))
        .with_http_client(reqwest::Client::new())
}

pub fn agent(server: &MockServer, root: &Path, config_toml: &str) -> Agent {
    let config: BifConfig = toml_config(config_toml);
    Agent::with_api_config(&config, root, claude_config(server)).expect("agent builds")
}

fn toml_config(raw: &str) -> BifConfig {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, raw).expect("write config");
    BifConfig::load_from(&path).expect("config parses")
}

/// Request bodies the server received, in order.
pub async fn request_bodies(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("json request body"))
        .collect()
}

pub struct Session {
    pub conversation: Conversation,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
}

pub fn session(agent: &Agent) -> Session {
    let (tx, ui) = mpsc::unbounded_channel();
    Session {
        conversation: agent.start_conversation(tx),
        ui,
    }
}

impl Session {
    pub async fn run(&mut self, message: &str) -> LoopState {
        self.conversation
            .run_agentic_loop(message, None, &AgenticLoop::new())
            .await
    }

    pub fn drain_ui(&mut self) -> Vec<UiEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            out.push(event);
        }
        out
    }
}
