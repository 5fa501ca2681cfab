use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AdapterContext, CompletionRequest, CompletionResult, ProviderConfig, ProviderId,
};
use crate::providers::{
    LOCAL_COMPLETION_TIMEOUT_MS, normalize_base_url, text_or_sentinel, tolerate_malformed,
};
use crate::transport::http::{HttpTransport, RetryPolicy};

pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub(crate) const MODELS_PATH: &str = "/api/models";
pub(crate) const TAGS_PATH: &str = "/api/tags";
pub(crate) const VERSION_PATH: &str = "/api/version";
const GENERATE_PATH: &str = "/api/generate";

pub struct OllamaAdapter {
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    options: GenerateOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

impl OllamaAdapter {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_timeout(LOCAL_COMPLETION_TIMEOUT_MS)
    }

    pub fn with_timeout(timeout_ms: u64) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(timeout_ms, RetryPolicy::no_retry())?;
        Ok(Self::with_transport(transport))
    }

    pub(crate) fn with_transport(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn generate_url(config: &ProviderConfig) -> String {
        format!("{}{GENERATE_PATH}", normalize_base_url(&config.base_url))
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        req: &CompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<CompletionResult, ProviderError> {
        let model = config.selected_model.as_str();
        let body = GenerateRequest {
            model,
            prompt: &req.prompt,
            options: GenerateOptions {
                temperature: req.options.temperature,
                num_predict: req.options.max_tokens,
            },
            stream: false,
        };

        let payload = tolerate_malformed(
            self.transport
                .post_json(
                    ProviderId::Ollama,
                    Some(model),
                    &Self::generate_url(config),
                    &body,
                    ctx,
                )
                .await,
        )?;

        let text = serde_json::from_value::<GenerateResponse>(payload)
            .ok()
            .and_then(|decoded| decoded.response);

        Ok(CompletionResult {
            text: text_or_sentinel(ProviderId::Ollama, text),
            provider: ProviderId::Ollama,
            model: model.to_string(),
        })
    }
}
