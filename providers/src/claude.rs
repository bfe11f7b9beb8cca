use serde_json::{Value, json};

use crate::sse_types::claude as typed;
use crate::{
    ChatMessage, Result, SendMessageRequest, SseParseAction, SseParser, StreamEvent,
    ToolDefinition, emit_or_continue, parse_sse_payload, send_retried_sse_request,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 8192;

fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

/// Tool input as an object. Malformed model output is replayed as `{}` so the
/// history stays acceptable to the API.
fn tool_input(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({}),
    }
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .is_some_and(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
}

fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    system_prompt: Option<&str>,
    tools: &[ToolDefinition],
) -> Value {
    let mut system_blocks: Vec<Value> = Vec::new();
    let mut api_messages: Vec<Value> = Vec::new();

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        system_blocks.push(text_block(prompt));
    }

    for message in messages {
        match message {
            ChatMessage::System(text) => system_blocks.push(text_block(text)),
            ChatMessage::User(text) => {
                api_messages.push(json!({ "role": "user", "content": [text_block(text)] }));
            }
            ChatMessage::Assistant { text, tool_calls } => {
                let mut content: Vec<Value> = Vec::new();
                if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                    content.push(text_block(text));
                }
                content.extend(tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": tool_input(&call.arguments)
                    })
                }));
                if !content.is_empty() {
                    api_messages.push(json!({ "role": "assistant", "content": content }));
                }
            }
            ChatMessage::ToolResult(result) => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": result.tool_call_id,
                    "content": result.content,
                    "is_error": result.is_error
                });
                // All results answering one assistant turn share a single user turn.
                match api_messages.last_mut() {
                    Some(last) if is_tool_result_turn(&*last) => {
                        if let Some(blocks) = last["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => api_messages.push(json!({ "role": "user", "content": [block] })),
                }
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("max_tokens".into(), json!(MAX_OUTPUT_TOKENS));
    body.insert("stream".into(), json!(true));
    body.insert("messages".into(), json!(api_messages));

    if !system_blocks.is_empty() {
        body.insert("system".into(), json!(system_blocks));
    }

    if !tools.is_empty() {
        let tool_schemas: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect();
        body.insert("tools".into(), json!(tool_schemas));
    }

    Value::Object(body)
}

#[derive(Default)]
struct ClaudeParser {
    /// Tool call receiving `input_json_delta` fragments.
    current_tool_id: Option<String>,
}

impl SseParser for ClaudeParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let Some(event) = parse_sse_payload::<typed::Event>(json, "Claude") else {
            return SseParseAction::Continue;
        };

        let mut events = Vec::new();

        match event {
            typed::Event::ContentBlockStart { content_block, .. } => match content_block {
                typed::ContentBlock::ToolUse { id, name } => {
                    if id.is_empty() {
                        return SseParseAction::Error("Claude tool call missing id".to_string());
                    }
                    if name.is_empty() {
                        return SseParseAction::Error("Claude tool call missing name".to_string());
                    }
                    self.current_tool_id = Some(id.clone());
                    events.push(StreamEvent::ToolCallStart { id, name });
                }
                typed::ContentBlock::Text { text } if !text.is_empty() => {
                    events.push(StreamEvent::TextDelta(text));
                }
                typed::ContentBlock::Text { .. } | typed::ContentBlock::Unknown => {}
            },

            typed::Event::ContentBlockDelta { delta, .. } => match delta {
                typed::Delta::TextDelta { text } => events.push(StreamEvent::TextDelta(text)),
                typed::Delta::InputJsonDelta { partial_json } => {
                    if let Some(id) = &self.current_tool_id {
                        events.push(StreamEvent::ToolCallDelta {
                            id: id.clone(),
                            arguments: partial_json,
                        });
                    }
                }
                typed::Delta::Unknown => {}
            },

            typed::Event::ContentBlockStop { .. } => {
                self.current_tool_id = None;
            }

            typed::Event::MessageDelta { delta } => {
                if let Some(typed::MessageDeltaInfo {
                    stop_reason: Some(typed::StopReason::MaxTokens),
                }) = delta
                {
                    tracing::warn!("Claude response truncated at max_tokens");
                }
            }

            typed::Event::MessageStop => return SseParseAction::Done,

            typed::Event::Error { error } => {
                let msg = if error.message.is_empty() {
                    format!("Claude stream error: {}", error.error_type)
                } else {
                    error.message
                };
                return SseParseAction::Error(msg);
            }

            typed::Event::MessageStart {} | typed::Event::Ping | typed::Event::Unknown => {}
        }

        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        "Claude"
    }
}

pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<()> {
    let config = request.config;
    let client = config.http();
    let url = format!("{}/messages", config.base_url());
    let body = build_request_body(
        config.model(),
        request.messages,
        request.system_prompt,
        request.tools,
    );

    let mut parser = ClaudeParser::default();
    send_retried_sse_request(
        || {
            client
                .post(&url)
                .header("x-api-key", config.api_key())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
        },
        config,
        &request.tx,
        &mut parser,
    )
    .await
}

#[cfg(test)]
mod tests {
    use bif_types::{ChatMessage, StreamEvent, ToolCall, ToolDefinition, ToolResult};
    use serde_json::json;

    use super::{ClaudeParser, build_request_body};
    use crate::test_support::collect;

    #[test]
    fn system_prompt_leads_system_blocks() {
        let messages = vec![
            ChatMessage::System("extra".to_string()),
            ChatMessage::user("hi"),
        ];
        let body = build_request_body("claude-sonnet-4-5", &messages, Some("prompt"), &[]);

        let system = body["system"].as_array().unwrap();
        assert_eq!(system[0]["text"], "prompt");
        assert_eq!(system[1]["text"], "extra");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_round_trip_shapes_history() {
        let messages = vec![
            ChatMessage::user("look"),
            ChatMessage::assistant(
                Some("checking".to_string()),
                vec![
                    ToolCall::new("toolu_1", "readFile", r#"{"filePath":"a.txt"}"#),
                    ToolCall::new("toolu_2", "showLocalDiff", ""),
                ],
            ),
            ChatMessage::ToolResult(ToolResult::success("toolu_1", "readFile", "hello")),
            ChatMessage::ToolResult(ToolResult::error("toolu_2", "showLocalDiff", "no git")),
        ];
        let tools = vec![ToolDefinition::new("readFile", "read", json!({"type": "object"}))];
        let body = build_request_body("claude-sonnet-4-5", &messages, None, &tools);

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);

        let assistant = msgs[1]["content"].as_array().unwrap();
        assert_eq!(assistant[0], json!({"type": "text", "text": "checking"}));
        assert_eq!(assistant[1]["input"], json!({"filePath": "a.txt"}));
        assert_eq!(assistant[2]["input"], json!({}));

        let results = msgs[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["is_error"], true);

        assert_eq!(body["tools"][0]["input_schema"], json!({"type": "object"}));
    }

    #[test]
    fn parser_streams_text_and_tool_calls() {
        let mut parser = ClaudeParser::default();
        let events = collect(
            &mut parser,
            &[
                json!({"type": "message_start", "message": {"id": "msg_1"}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Reading"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "readFile"}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"filePath\""}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": ":\"a\"}"}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
                json!({"type": "message_stop"}),
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Reading".to_string()),
                StreamEvent::ToolCallStart {
                    id: "toolu_1".to_string(),
                    name: "readFile".to_string()
                },
                StreamEvent::ToolCallDelta {
                    id: "toolu_1".to_string(),
                    arguments: "{\"filePath\"".to_string()
                },
                StreamEvent::ToolCallDelta {
                    id: "toolu_1".to_string(),
                    arguments: ":\"a\"}".to_string()
                },
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn parser_surfaces_stream_errors() {
        let mut parser = ClaudeParser::default();
        let events = collect(
            &mut parser,
            &[json!({"type": "error", "error": {"type": "overloaded_error", "message": ""}})],
        );
        assert_eq!(
            events,
            vec![StreamEvent::Error("Claude stream error: overloaded_error".to_string())]
        );
    }

    #[test]
    fn tool_use_without_id_is_an_error() {
        let mut parser = ClaudeParser::default();
        let events = collect(
            &mut parser,
            &[json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "", "name": "readFile"}})],
        );
        assert!(matches!(events.as_slice(), [StreamEvent::Error(_)]));
    }
}
