use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::core::error::{CompletionError, ConfigError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AdapterContext, AgentBlueprint, AgentPersona, CompletionOptions, CompletionRequest,
    CompletionResult, ConnectionTestReport, ConversationTurn, ProviderConfig, ProviderId,
};
use crate::prompt::{self, extract_json_object};
use crate::providers;
use crate::registry::ProviderRegistry;

pub const CONNECTION_TEST_PROMPT: &str =
    "Hello, this is a connection test. Please respond with 'Connection successful'.";
const CONNECTION_TEST_MAX_TOKENS: u32 = 50;
const BLUEPRINT_TEMPERATURE: f32 = 0.3;

/// Routes completions to whichever provider the registry marks active.
pub struct CompletionClient {
    registry: Arc<ProviderRegistry>,
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    settings: ClientSettings,
}

pub struct CompletionClientBuilder {
    registry: Option<Arc<ProviderRegistry>>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    settings: ClientSettings,
}

impl CompletionClient {
    pub fn builder() -> CompletionClientBuilder {
        CompletionClientBuilder {
            registry: None,
            adapters: Vec::new(),
            settings: ClientSettings::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Sends `prompt` to the active provider. Fails before any network I/O
    /// when no usable provider is active.
    pub async fn complete(
        &self,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<CompletionResult, CompletionError> {
        self.complete_with_cancellation(prompt, options, CancellationToken::new())
            .await
    }

    pub async fn complete_with_cancellation(
        &self,
        prompt: &str,
        options: CompletionOptions,
        cancellation: CancellationToken,
    ) -> Result<CompletionResult, CompletionError> {
        let config = self.resolve_active()?;
        self.dispatch(&config, prompt, options, cancellation).await
    }

    async fn dispatch(
        &self,
        config: &ProviderConfig,
        prompt: &str,
        options: CompletionOptions,
        cancellation: CancellationToken,
    ) -> Result<CompletionResult, CompletionError> {
        let adapter = self
            .adapters
            .get(&config.id)
            .ok_or(CompletionError::AdapterNotRegistered {
                provider: config.id,
            })?;

        let request = CompletionRequest {
            prompt: prompt.to_string(),
            options,
        };
        let ctx = AdapterContext::with_cancellation(cancellation);

        debug!(
            provider = %config.id,
            model = %config.selected_model,
            prompt_chars = prompt.chars().count(),
            "dispatching completion"
        );
        let result = adapter.complete(config, &request, &ctx).await;
        match &result {
            Ok(completion) => debug!(
                provider = %completion.provider,
                reply_chars = completion.text.chars().count(),
                "completion finished"
            ),
            Err(error) => warn!(provider = %config.id, %error, "completion failed"),
        }
        result.map_err(CompletionError::from)
    }

    /// Answers `user_message` in the voice of `persona`, using the recent
    /// part of `history` as context.
    pub async fn generate_agent_response(
        &self,
        persona: &AgentPersona,
        history: &[ConversationTurn],
        user_message: &str,
    ) -> Result<CompletionResult, CompletionError> {
        let prompt = prompt::compose_with_window(
            persona,
            history,
            user_message,
            self.settings.history_window,
        );
        self.complete(&prompt, persona.settings.completion_options())
            .await
    }

    /// Asks the active model to design an agent for `description`.
    ///
    /// A reply that does not contain a usable JSON object yields
    /// [`AgentBlueprint::fallback`]; transport failures are still errors.
    pub async fn generate_agent_config(
        &self,
        description: &str,
    ) -> Result<AgentBlueprint, CompletionError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CompletionError::InvalidRequest {
                provider: None,
                message: "an agent description is required".to_string(),
            });
        }

        let options = CompletionOptions {
            temperature: BLUEPRINT_TEMPERATURE,
            ..CompletionOptions::default()
        };
        let reply = self
            .complete(&prompt::agent_config_prompt(description), options)
            .await?;

        let parsed = extract_json_object(&reply.text)
            .map(serde_json::from_str::<AgentBlueprint>)
            .transpose();
        match parsed {
            Ok(Some(blueprint)) => Ok(blueprint),
            Ok(None) => {
                warn!(provider = %reply.provider, "blueprint reply contained no json object");
                Ok(AgentBlueprint::fallback(description))
            }
            Err(error) => {
                warn!(provider = %reply.provider, %error, "blueprint reply was not a valid blueprint");
                Ok(AgentBlueprint::fallback(description))
            }
        }
    }

    /// Round-trips a short prompt through the active provider.
    pub async fn test_connection(&self) -> ConnectionTestReport {
        let outcome = match self.resolve_active() {
            Ok(config) => self.send_connection_test(&config).await,
            Err(error) => Err(error),
        };
        connection_report(outcome)
    }

    /// Same as [`Self::test_connection`] for `provider`, which need not be
    /// the active one. The active pointer is left untouched.
    pub async fn test_connection_for(&self, provider: ProviderId) -> ConnectionTestReport {
        let outcome = match self.resolve(provider) {
            Ok(config) => self.send_connection_test(&config).await,
            Err(error) => Err(error),
        };
        connection_report(outcome)
    }

    async fn send_connection_test(
        &self,
        config: &ProviderConfig,
    ) -> Result<CompletionResult, CompletionError> {
        let options = CompletionOptions {
            max_tokens: CONNECTION_TEST_MAX_TOKENS,
            ..CompletionOptions::default()
        };
        self.dispatch(
            config,
            CONNECTION_TEST_PROMPT,
            options,
            CancellationToken::new(),
        )
        .await
    }

    fn resolve_active(&self) -> Result<ProviderConfig, CompletionError> {
        match self.registry.active_id() {
            Some(provider) => self.resolve(provider),
            None => Err(CompletionError::NoActiveProvider { provider: None }),
        }
    }

    fn resolve(&self, provider: ProviderId) -> Result<ProviderConfig, CompletionError> {
        match self.registry.get(provider) {
            Some(config) if config.is_usable() => Ok(config),
            Some(config)
                if !config.is_local
                    && config.enabled
                    && !config.selected_model.is_empty()
                    && !config.has_credential() =>
            {
                Err(CompletionError::MissingCredential {
                    provider: config.id,
                })
            }
            _ => Err(CompletionError::NoActiveProvider {
                provider: Some(provider),
            }),
        }
    }
}

fn connection_report(outcome: Result<CompletionResult, CompletionError>) -> ConnectionTestReport {
    match outcome {
        Ok(result) => {
            info!(provider = %result.provider, model = %result.model, "connection test passed");
            ConnectionTestReport {
                success: true,
                response: Some(result.text),
                error: None,
            }
        }
        Err(error) => ConnectionTestReport {
            success: false,
            response: None,
            error: Some(error.to_string()),
        },
    }
}

impl CompletionClientBuilder {
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the stock adapter for the adapter's provider.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<CompletionClient, ConfigError> {
        self.settings.validate()?;

        let mut adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = self
            .adapters
            .into_iter()
            .map(|adapter| (adapter.id(), adapter))
            .collect();
        for provider in ProviderId::ALL {
            if adapters.contains_key(&provider) {
                continue;
            }
            let adapter = providers::builtin_adapter(
                provider,
                self.settings.local_timeout_ms,
                self.settings.cloud_timeout_ms,
                self.settings.cloud_retry.clone(),
            )?;
            adapters.insert(provider, adapter);
        }

        Ok(CompletionClient {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ProviderRegistry::default())),
            adapters,
            settings: self.settings,
        })
    }
}
