use bif_providers::ApiConfigError;
use bif_tools::ToolError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The model call failed. Fatal to the current loop, never retried.
    #[error("Model request failed: {0}")]
    ModelRequestFailed(String),
    #[error("Tool iteration limit reached ({limit} tool rounds in one turn)")]
    ToolIterationLimit { limit: u32 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Provider(#[from] ApiConfigError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}
