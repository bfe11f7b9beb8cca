//! Streaming model-provider clients.
//!
//! [`send_message`] dispatches on [`ApiConfig::provider`]:
//!
//! - [`claude`] - Anthropic Messages API
//! - [`openai`] - Chat Completions API, used for both OpenAI and xAI
//!
//! Every client normalizes its stream into [`StreamEvent`]s sent over a
//! [`tokio::sync::mpsc::Sender`]. A stream always ends with exactly one
//! `Done` or `Error` event unless the receiver goes away first.
//!
//! # Error Handling
//!
//! API and transport errors discovered after the request was built are
//! delivered as `StreamEvent::Error` so partial output stays visible. Only
//! failures that prevent reading the response body at all return `Err`.

pub mod claude;
pub mod openai;
pub mod retry;
pub mod sse_types;

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

pub(crate) use anyhow::Result;
pub(crate) use bif_types::{ChatMessage, StreamEvent, ToolDefinition};
use serde::{Deserialize, Serialize};
pub(crate) use tokio::sync::mpsc;

pub use bif_types;

/// Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
/// OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// xAI API base URL (OpenAI-compatible).
pub const XAI_BASE_URL: &str = "https://api.x.ai/v1";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTPS-only client for production endpoints.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build hardened HTTP client: {e}. Using default client.");
            reqwest::Client::default()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(true)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .user_agent(concat!("bif/", env!("CARGO_PKG_VERSION")))
}

// ============================================================================
// Provider selection
// ============================================================================

/// Model vendor. Determines wire format, endpoint and credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Xai,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Anthropic, Provider::OpenAI, Provider::Xai];

    /// Infer the vendor from a model name (`claude-*`, `gpt-*`/`o*`, `grok-*`).
    #[must_use]
    pub fn from_model(model: &str) -> Option<Self> {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("claude") {
            Some(Self::Anthropic)
        } else if model.starts_with("grok") {
            Some(Self::Xai)
        } else if model.starts_with("gpt")
            || model.starts_with("chatgpt")
            || (model.starts_with('o') && model[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            Some(Self::OpenAI)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Xai => "xai",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::OpenAI => "OpenAI",
            Self::Xai => "xAI",
        }
    }

    /// Environment variable consulted when no key is configured.
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Xai => "XAI_API_KEY",
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_BASE_URL,
            Self::OpenAI => OPENAI_BASE_URL,
            Self::Xai => XAI_BASE_URL,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// SSE framing
// ============================================================================

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the `data:` lines of one SSE event. `None` when the event has none.
fn extract_sse_data(event: &str) -> Option<String> {
    let mut lines = event
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .peekable();
    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

#[derive(Debug)]
pub(crate) enum SseParseAction {
    /// Nothing to emit for this payload.
    Continue,
    /// Emit these events and keep reading.
    Emit(Vec<StreamEvent>),
    /// Provider signalled the end of the response.
    Done,
    Error(String),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;
    fn provider_name(&self) -> &'static str;
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let timeout = std::env::var("BIF_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(timeout)
    })
}

pub(crate) async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

pub(crate) fn parse_sse_payload<T>(
    json: &serde_json::Value,
    provider_name: &'static str,
) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    match T::deserialize(json) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(%e, provider = provider_name, "Failed to parse SSE event");
            None
        }
    }
}

pub(crate) fn emit_or_continue(events: Vec<StreamEvent>) -> SseParseAction {
    if events.is_empty() {
        SseParseAction::Continue
    } else {
        SseParseAction::Emit(events)
    }
}

/// Send `events`, stopping at the first terminal one. Returns `false` when
/// the stream is over (terminal event sent or receiver dropped).
async fn forward_events(tx: &mpsc::Sender<StreamEvent>, events: Vec<StreamEvent>) -> bool {
    for event in events {
        let is_terminal = matches!(&event, StreamEvent::Done | StreamEvent::Error(_));
        if !send_event(tx, event).await || is_terminal {
            return false;
        }
    }
    true
}

/// Drive an SSE response through a provider parser.
///
/// Enforces the idle timeout, the buffer cap, UTF-8 and the parse-error
/// threshold, and always terminates the stream with `Done` or `Error`.
pub(crate) async fn process_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_event(tx, StreamEvent::Error("Stream idle timeout".to_string())).await;
            return Ok(());
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_event(
                tx,
                StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".to_string()),
            )
            .await;
            return Ok(());
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_event(
                    tx,
                    StreamEvent::Error("Received invalid UTF-8 from SSE stream".to_string()),
                )
                .await;
                return Ok(());
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                let _ = send_event(tx, StreamEvent::Done).await;
                return Ok(());
            }

            let json = match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => json,
                Err(e) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        provider = parser.provider_name(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            StreamEvent::Error(format!("Invalid stream payload: {e}")),
                        )
                        .await;
                        return Ok(());
                    }
                    continue;
                }
            };
            parse_errors = 0;

            let events = match parser.parse(&json) {
                SseParseAction::Continue => continue,
                SseParseAction::Emit(events) => events,
                SseParseAction::Done => vec![StreamEvent::Done],
                SseParseAction::Error(msg) => vec![StreamEvent::Error(msg)],
            };
            if !forward_events(tx, events).await {
                return Ok(());
            }
        }
    }

    let _ = send_event(
        tx,
        StreamEvent::Error("Connection closed before stream completed".to_string()),
    )
    .await;
    Ok(())
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[derive(Debug)]
pub(crate) enum ApiResponse {
    Success(reqwest::Response),
    StreamTerminated,
}

pub(crate) async fn handle_response(
    outcome: retry::RetryOutcome,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ApiResponse> {
    let response = match outcome {
        retry::RetryOutcome::Success(resp) | retry::RetryOutcome::HttpError(resp) => resp,
        retry::RetryOutcome::ConnectionError { attempts, source } => {
            let _ = send_event(
                tx,
                StreamEvent::Error(format!(
                    "Request failed after {attempts} attempts: {source}"
                )),
            )
            .await;
            return Ok(ApiResponse::StreamTerminated);
        }
        retry::RetryOutcome::NonRetryable(e) => {
            let _ = send_event(tx, StreamEvent::Error(format!("Request failed: {e}"))).await;
            return Ok(ApiResponse::StreamTerminated);
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let error_text = read_capped_error_body(response).await;
        let _ = send_event(
            tx,
            StreamEvent::Error(format!("API error {status}: {error_text}")),
        )
        .await;
        return Ok(ApiResponse::StreamTerminated);
    }

    Ok(ApiResponse::Success(response))
}

pub(crate) async fn send_retried_sse_request<P, F>(
    build_request: F,
    config: &ApiConfig,
    tx: &mpsc::Sender<StreamEvent>,
    parser: &mut P,
) -> Result<()>
where
    P: SseParser,
    F: Fn() -> reqwest::RequestBuilder,
{
    let outcome = retry::send_with_retry(build_request, &config.retry).await;
    let response = match handle_response(outcome, tx).await? {
        ApiResponse::Success(resp) => resp,
        ApiResponse::StreamTerminated => return Ok(()),
    };

    process_sse_stream(response, parser, tx, config.idle_timeout).await
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiConfigError {
    #[error("cannot determine the provider for model '{0}'")]
    UnknownModel(String),
    #[error("no API key configured for {provider} (set {})", provider.env_var())]
    MissingApiKey { provider: Provider },
}

/// Credentials, model and transport settings for one provider.
///
/// ```rust
/// use bif_providers::{ApiConfig, Provider};
///
/// let config = ApiConfig::new(Provider::Xai, "xai-key", "grok-3").unwrap();
/// assert_eq!(config.base_url(), "https://api.x.ai/v1");
/// ```
#[derive(Clone)]
pub struct ApiConfig {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
    retry: retry::RetryConfig,
    idle_timeout: Duration,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ApiConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ApiConfigError::MissingApiKey { provider });
        }
        Ok(Self {
            provider,
            api_key,
            model: model.into(),
            base_url: provider.default_base_url().to_string(),
            http: http_client().clone(),
            retry: retry::RetryConfig::default(),
            idle_timeout: stream_idle_timeout(),
        })
    }

    /// Build a config for `model`, inferring the provider from its name.
    pub fn for_model(api_key: impl Into<String>, model: &str) -> Result<Self, ApiConfigError> {
        let provider =
            Provider::from_model(model).ok_or_else(|| ApiConfigError::UnknownModel(model.into()))?;
        Self::new(provider, api_key, model)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the shared HTTPS-only client, e.g. to reach a local endpoint.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: retry::RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// One streaming completion request.
#[derive(Debug)]
pub struct SendMessageRequest<'a> {
    pub config: &'a ApiConfig,
    pub messages: &'a [ChatMessage],
    pub system_prompt: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub tx: mpsc::Sender<StreamEvent>,
}

/// Stream a completion from whichever provider `request.config` names.
pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<()> {
    tracing::debug!(
        provider = request.config.provider().as_str(),
        model = request.config.model(),
        messages = request.messages.len(),
        tools = request.tools.len(),
        "Sending model request"
    );
    match request.config.provider() {
        Provider::Anthropic => claude::send_message(request).await,
        Provider::OpenAI | Provider::Xai => openai::send_message(request).await,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use bif_types::StreamEvent;

    use crate::{SseParseAction, SseParser};

    pub fn collect(parser: &mut impl SseParser, payloads: &[serde_json::Value]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for payload in payloads {
            match parser.parse(payload) {
                SseParseAction::Continue => {}
                SseParseAction::Emit(events) => out.extend(events),
                SseParseAction::Done => out.push(StreamEvent::Done),
                SseParseAction::Error(msg) => out.push(StreamEvent::Error(msg)),
            }
        }
        out
    }
}
