//! Seam between the conversation loop and the model provider.

use std::future::Future;
use std::pin::Pin;

use bif_providers::{ApiConfig, SendMessageRequest};
use bif_types::{ChatMessage, StreamEvent, ToolDefinition};
use tokio::sync::mpsc;

pub type ModelFut<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Everything one model request carries.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub system_prompt: &'a str,
    pub tools: &'a [ToolDefinition],
}

/// Streams one completion as [`StreamEvent`]s.
///
/// Provider-reported failures arrive as [`StreamEvent::Error`]; an `Err`
/// return means the request could not be attempted at all.
pub trait ModelClient: Send + Sync {
    fn model_name(&self) -> &str;

    fn stream<'a>(
        &'a self,
        request: ModelRequest<'a>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> ModelFut<'a>;
}

/// [`ModelClient`] backed by the HTTP provider clients.
#[derive(Debug, Clone)]
pub struct ProviderModel {
    config: ApiConfig,
}

impl ProviderModel {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }
}

impl ModelClient for ProviderModel {
    fn model_name(&self) -> &str {
        self.config.model()
    }

    fn stream<'a>(
        &'a self,
        request: ModelRequest<'a>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> ModelFut<'a> {
        Box::pin(async move {
            let request = SendMessageRequest {
                config: &self.config,
                messages: request.messages,
                system_prompt: Some(request.system_prompt),
                tools: request.tools,
                tx,
            };
            bif_providers::send_message(&request).await
        })
    }
}
