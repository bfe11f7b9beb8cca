//! Chat Completions client shared by OpenAI and xAI.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::sse_types::openai as typed;
use crate::{
    ChatMessage, Result, SendMessageRequest, SseParseAction, SseParser, StreamEvent,
    ToolDefinition, emit_or_continue, parse_sse_payload, send_retried_sse_request,
};

fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    system_prompt: Option<&str>,
    tools: &[ToolDefinition],
) -> Value {
    let mut api_messages: Vec<Value> = Vec::new();

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        api_messages.push(json!({ "role": "system", "content": prompt }));
    }

    for message in messages {
        let entry = match message {
            ChatMessage::System(text) => json!({ "role": "system", "content": text }),
            ChatMessage::User(text) => json!({ "role": "user", "content": text }),
            ChatMessage::Assistant { text, tool_calls } => {
                let mut entry = json!({
                    "role": "assistant",
                    "content": text.as_deref().filter(|t| !t.is_empty()),
                });
                if !tool_calls.is_empty() {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|call| {
                            let arguments = if call.arguments.trim().is_empty() {
                                "{}"
                            } else {
                                call.arguments.as_str()
                            };
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": arguments }
                            })
                        })
                        .collect();
                    entry["tool_calls"] = json!(calls);
                }
                entry
            }
            ChatMessage::ToolResult(result) => json!({
                "role": "tool",
                "tool_call_id": result.tool_call_id,
                "content": result.content,
            }),
        };
        api_messages.push(entry);
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("stream".into(), json!(true));
    body.insert("messages".into(), json!(api_messages));

    if !tools.is_empty() {
        let tool_schemas: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect();
        body.insert("tools".into(), json!(tool_schemas));
    }

    Value::Object(body)
}

struct ChatCompletionsParser {
    /// Tool call ids by stream `index`; later fragments carry only the index.
    call_ids: HashMap<u32, String>,
    provider: &'static str,
}

impl ChatCompletionsParser {
    fn new(provider: &'static str) -> Self {
        Self {
            call_ids: HashMap::new(),
            provider,
        }
    }

    fn tool_call_events(&mut self, delta: typed::ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let function = delta.function.unwrap_or_default();

        if let Some(id) = delta.id.filter(|id| !id.is_empty())
            && !self.call_ids.contains_key(&delta.index)
        {
            self.call_ids.insert(delta.index, id.clone());
            events.push(StreamEvent::ToolCallStart {
                id,
                name: function.name.clone().unwrap_or_default(),
            });
        }

        let Some(id) = self.call_ids.get(&delta.index) else {
            tracing::debug!(index = delta.index, "Tool call fragment before its id");
            return;
        };
        if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
            events.push(StreamEvent::ToolCallDelta {
                id: id.clone(),
                arguments,
            });
        }
    }
}

impl SseParser for ChatCompletionsParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let Some(chunk) = parse_sse_payload::<typed::Chunk>(json, self.provider) else {
            return SseParseAction::Continue;
        };

        if let Some(error) = chunk.error {
            let msg = if error.message.is_empty() {
                format!(
                    "{} stream error: {}",
                    self.provider,
                    error.error_type.as_deref().unwrap_or("unknown")
                )
            } else {
                error.message
            };
            return SseParseAction::Error(msg);
        }

        let mut events = Vec::new();
        // Only the first choice is requested.
        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                self.tool_call_events(delta, &mut events);
            }
            if choice.finish_reason == Some(typed::FinishReason::Length) {
                tracing::warn!(provider = self.provider, "Response truncated at max tokens");
            }
        }

        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        self.provider
    }
}

pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<()> {
    let config = request.config;
    let client = config.http();
    let url = format!("{}/chat/completions", config.base_url());
    let body = build_request_body(
        config.model(),
        request.messages,
        request.system_prompt,
        request.tools,
    );

    let mut parser = ChatCompletionsParser::new(config.provider().display_name());
    send_retried_sse_request(
        || client.post(&url).bearer_auth(config.api_key()).json(&body),
        config,
        &request.tx,
        &mut parser,
    )
    .await
}
