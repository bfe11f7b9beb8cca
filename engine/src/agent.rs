//! Process-wide services and the conversation factory.

use std::path::Path;
use std::sync::Arc;

use bif_providers::{ApiConfig, ApiConfigError, Provider};
use bif_tools::{ApprovalGate, ProjectRoot, ToolDispatcher, ToolRegistry, builtins};
use bif_types::{ApprovalMode, ConversationId};

use crate::config::BifConfig;
use crate::context::{ContextCollector, NoContext};
use crate::conversation::{Conversation, LoopSettings, UiSender};
use crate::error::EngineError;
use crate::model::{ModelClient, ProviderModel};

/// Owns the services shared by every conversation: the tool registry, the
/// approval gate, the model client and the context collector.
#[derive(Clone)]
pub struct Agent {
    dispatcher: ToolDispatcher,
    model: Arc<dyn ModelClient>,
    collector: Arc<dyn ContextCollector>,
    settings: LoopSettings,
    default_mode: ApprovalMode,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model.model_name())
            .field("registry", self.dispatcher.registry())
            .field("settings", &self.settings)
            .field("default_mode", &self.default_mode)
            .finish_non_exhaustive()
    }
}

impl Agent {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        project: ProjectRoot,
        model: Arc<dyn ModelClient>,
        settings: LoopSettings,
    ) -> Self {
        let gate = Arc::new(ApprovalGate::new());
        Self {
            dispatcher: ToolDispatcher::new(registry, gate, project),
            model,
            collector: Arc::new(NoContext),
            settings,
            default_mode: ApprovalMode::default(),
        }
    }

    /// Build an agent from the config file, for the project at `project_root`.
    ///
    /// Fails when the model's provider cannot be determined, when no API key
    /// is available for it, when the project root is missing, or when the
    /// tool catalog is inconsistent.
    pub fn from_config(config: &BifConfig, project_root: &Path) -> Result<Self, EngineError> {
        let model = config.model();
        let provider = Provider::from_model(model)
            .ok_or_else(|| ApiConfigError::UnknownModel(model.to_string()))?;
        let api_key = config
            .api_key_for(provider)
            .ok_or(ApiConfigError::MissingApiKey { provider })?;
        let api = ApiConfig::new(provider, api_key, model)?;
        Self::with_api_config(config, project_root, api)
    }

    /// Like [`Agent::from_config`] with an explicit provider configuration.
    pub fn with_api_config(
        config: &BifConfig,
        project_root: &Path,
        api: ApiConfig,
    ) -> Result<Self, EngineError> {
        let project = ProjectRoot::new(project_root)?;
        let registry = builtins::builtin_registry(&config.tool_settings())?;
        let settings = LoopSettings {
            max_attempts: config.max_attempts(),
            max_tool_iterations: config.max_tool_iterations(),
            ..LoopSettings::default()
        };
        tracing::info!(
            provider = api.provider().as_str(),
            model = api.model(),
            tools = registry.len(),
            project = %project.path().display(),
            "Agent configured"
        );
        Ok(Self::new(
            Arc::new(registry),
            project,
            Arc::new(ProviderModel::new(api)),
            settings,
        )
        .with_default_mode(config.approval_mode()))
    }

    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn ContextCollector>) -> Self {
        self.collector = collector;
        self
    }

    #[must_use]
    pub fn with_default_mode(mut self, mode: ApprovalMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        self.dispatcher.gate()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.dispatcher.registry()
    }

    #[must_use]
    pub fn project(&self) -> &ProjectRoot {
        self.dispatcher.project()
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    #[must_use]
    pub fn default_mode(&self) -> ApprovalMode {
        self.default_mode
    }

    /// Start a conversation under a fresh `conv_<uuid>` id, using the
    /// agent's default approval mode.
    #[must_use]
    pub fn start_conversation(&self, ui: UiSender) -> Conversation {
        let id = ConversationId::new(format!("conv_{}", uuid::Uuid::new_v4()));
        self.gate().set_mode(&id, self.default_mode);
        tracing::info!(conversation = %id, "Conversation started");
        Conversation::new(
            id,
            Arc::clone(&self.model),
            self.dispatcher.clone(),
            Arc::clone(&self.collector),
            self.settings,
            ui,
        )
    }

    /// Release everything the gate holds for `conversation`. Invocations still
    /// waiting for approval resume as rejected.
    pub fn end_conversation(&self, conversation: &ConversationId) {
        self.gate().end_conversation(conversation);
        tracing::info!(conversation = %conversation, "Conversation ended");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bif_providers::{ApiConfig, Provider};
    use bif_tools::{ProjectRoot, ToolRegistry};
    use bif_types::ApprovalMode;
    use tokio::sync::mpsc;

    use super::Agent;
    use crate::config::BifConfig;
    use crate::conversation::LoopSettings;
    use crate::error::EngineError;
    use crate::model::ProviderModel;

    fn agent(dir: &tempfile::TempDir) -> Agent {
        let api = ApiConfig::new(Provider::Anthropic, "sk-test", "claude-sonnet-4-5").unwrap();
        Agent::new(
            Arc::new(ToolRegistry::default()),
            ProjectRoot::new(dir.path()).unwrap(),
            Arc::new(ProviderModel::new(api)),
            LoopSettings::default(),
        )
    }

    #[test]
    fn conversations_get_unique_prefixed_ids_and_default_mode() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&dir).with_default_mode(ApprovalMode::AskForShellCommands);
        let (tx, _rx) = mpsc::unbounded_channel();

        let a = agent.start_conversation(tx.clone());
        let b = agent.start_conversation(tx);

        assert!(a.id().as_str().starts_with("conv_"));
        assert_ne!(a.id(), b.id());
        assert_eq!(agent.gate().mode(a.id()), ApprovalMode::AskForShellCommands);
    }

    #[test]
    fn ending_a_conversation_resets_its_mode() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&dir).with_default_mode(ApprovalMode::AutoApprove);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conv = agent.start_conversation(tx);

        agent.end_conversation(conv.id());

        assert_eq!(agent.gate().mode(conv.id()), ApprovalMode::AlwaysAsk);
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config: BifConfig =
            toml::from_str("[app]\nmodel = \"grok-3\"\n[api_keys]\nxai = \"\"\n").unwrap();
        unsafe {
            std::env::remove_var("XAI_API_KEY");
        }
        let err = Agent::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)), "{err}");
        assert!(err.to_string().contains("XAI_API_KEY"));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config: BifConfig = toml::from_str("[app]\nmodel = \"mystery-1\"\n").unwrap();
        assert!(Agent::from_config(&config, dir.path()).is_err());
    }

    #[test]
    fn missing_project_root_is_a_configuration_error() {
        let config = BifConfig::default();
        let api = ApiConfig::new(Provider::Anthropic, "sk-test", "claude-sonnet-4-5").unwrap();
        let err = Agent::with_api_config(&config, std::path::Path::new("/definitely/not/here"), api)
            .unwrap_err();
        assert!(matches!(err, EngineError::Tool(_)), "{err}");
    }

    #[test]
    fn builtin_catalog_is_advertised() {
        let dir = tempfile::tempdir().unwrap();
        let api = ApiConfig::new(Provider::OpenAI, "sk-test", "gpt-4o").unwrap();
        let agent = Agent::with_api_config(&BifConfig::default(), dir.path(), api).unwrap();
        assert_eq!(agent.registry().len(), 9);
        assert_eq!(agent.model_name(), "gpt-4o");
    }
}
