use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use bif_providers::Provider;
use bif_tools::config::{ShellConfig, ToolSettings};
use bif_types::ApprovalMode;
use serde::Deserialize;

/// Retry budget of one agentic loop: the first request plus automatic continuations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;
/// Tool round-trips allowed within a single model turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 50;
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Default, Deserialize)]
pub struct BifConfig {
    pub app: Option<AppConfig>,
    pub api_keys: Option<ApiKeys>,
    /// Deadlines and templates for the built-in tools.
    pub tools: Option<ToolsConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config at {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config at {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub model: Option<String>,
    /// Requests per agentic loop before it gives up waiting for the completion marker.
    pub max_attempts: Option<u32>,
    pub max_tool_iterations: Option<u32>,
    /// Approval policy for new conversations.
    pub approval_mode: Option<ApprovalMode>,
}

#[derive(Default, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub xai: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(opt: Option<&String>) -> &'static str {
            if opt.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("ApiKeys")
            .field("anthropic", &mask(self.anthropic.as_ref()))
            .field("openai", &mask(self.openai.as_ref()))
            .field("xai", &mask(self.xai.as_ref()))
            .finish()
    }
}

impl ApiKeys {
    fn get(&self, provider: Provider) -> Option<&String> {
        match provider {
            Provider::Anthropic => self.anthropic.as_ref(),
            Provider::OpenAI => self.openai.as_ref(),
            Provider::Xai => self.xai.as_ref(),
        }
    }
}

/// Tool configuration.
///
/// ```toml
/// [tools]
/// test_timeout_secs = 600
/// test_command = "cargo test {target}"
///
/// [tools.shell]
/// binary = "bash"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct ToolsConfig {
    pub default_timeout_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub test_timeout_secs: Option<u64>,
    pub shell_timeout_secs: Option<u64>,
    pub max_search_results: Option<usize>,
    pub test_command: Option<String>,
    pub shell: Option<ShellConfig>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < value.len() {
        if value[i..].starts_with("${") {
            let start = i + 2;
            if let Some(end_rel) = value[start..].find('}') {
                let end = start + end_rel;
                let var = &value[start..end];
                if !var.is_empty() {
                    let replacement = env::var(var).unwrap_or_default();
                    out.push_str(&replacement);
                }
                i = end + 1;
                continue;
            }
        }

        let Some(ch) = value[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

impl BifConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.app
            .as_ref()
            .and_then(|app| app.model.as_deref())
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.app
            .as_ref()
            .and_then(|app| app.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1)
    }

    #[must_use]
    pub fn max_tool_iterations(&self) -> u32 {
        self.app
            .as_ref()
            .and_then(|app| app.max_tool_iterations)
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS)
            .max(1)
    }

    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        self.app
            .as_ref()
            .and_then(|app| app.approval_mode)
            .unwrap_or_default()
    }

    /// API key for `provider`: the config value (with `${VAR}` expansion) wins,
    /// then the provider's environment variable.
    #[must_use]
    pub fn api_key_for(&self, provider: Provider) -> Option<String> {
        let configured = self
            .api_keys
            .as_ref()
            .and_then(|keys| keys.get(provider))
            .map(|raw| expand_env_vars(raw))
            .filter(|key| !key.trim().is_empty());
        configured.or_else(|| {
            env::var(provider.env_var())
                .ok()
                .filter(|key| !key.trim().is_empty())
        })
    }

    #[must_use]
    pub fn tool_settings(&self) -> ToolSettings {
        let mut settings = ToolSettings::default();
        let Some(tools) = self.tools.as_ref() else {
            return settings;
        };
        let timeouts = &mut settings.timeouts;
        if let Some(secs) = tools.default_timeout_secs {
            timeouts.default = Duration::from_secs(secs);
        }
        if let Some(secs) = tools.search_timeout_secs {
            timeouts.search = Duration::from_secs(secs);
        }
        if let Some(secs) = tools.test_timeout_secs {
            timeouts.tests = Duration::from_secs(secs);
        }
        if let Some(secs) = tools.shell_timeout_secs {
            timeouts.shell = Duration::from_secs(secs);
        }
        if let Some(max) = tools.max_search_results {
            settings.max_search_results = max.max(1);
        }
        if let Some(command) = tools.test_command.as_ref().filter(|c| !c.trim().is_empty()) {
            settings.test_command = command.clone();
        }
        if let Some(shell) = tools.shell.as_ref() {
            settings.shell = shell.clone();
        }
        settings
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".bif").join("config.toml"))
}
