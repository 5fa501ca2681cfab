use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AdapterContext, CompletionRequest, CompletionResult, ProviderConfig, ProviderId,
};
use crate::providers::{
    CLOUD_COMPLETION_TIMEOUT_MS, normalize_base_url, require_credential, text_or_sentinel,
    tolerate_malformed,
};
use crate::transport::http::{AUTH_BEARER_TOKEN_KEY, HttpTransport, RetryPolicy};

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub struct OpenAiAdapter {
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiAdapter {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_settings(CLOUD_COMPLETION_TIMEOUT_MS, RetryPolicy::default())
    }

    pub fn with_settings(timeout_ms: u64, retry_policy: RetryPolicy) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(timeout_ms, retry_policy)?;
        Ok(Self::with_transport(transport))
    }

    pub(crate) fn with_transport(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn chat_completions_url(config: &ProviderConfig) -> String {
        format!("{}/chat/completions", normalize_base_url(&config.base_url))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        req: &CompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<CompletionResult, ProviderError> {
        let api_key = require_credential(config)?;
        let model = config.selected_model.as_str();

        if req.options.stream {
            debug!(provider = %ProviderId::OpenAi, "streaming requested; sending a buffered request");
        }

        let body = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.options.temperature,
            max_tokens: req.options.max_tokens,
            stream: false,
        };

        let mut request_ctx = ctx.clone();
        request_ctx
            .metadata
            .insert(AUTH_BEARER_TOKEN_KEY.to_string(), api_key);

        let payload = tolerate_malformed(
            self.transport
                .post_json(
                    ProviderId::OpenAi,
                    Some(model),
                    &Self::chat_completions_url(config),
                    &body,
                    &request_ctx,
                )
                .await,
        )?;

        let text = serde_json::from_value::<ChatCompletionResponse>(payload)
            .ok()
            .and_then(|decoded| decoded.choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content);

        Ok(CompletionResult {
            text: text_or_sentinel(ProviderId::OpenAi, text),
            provider: ProviderId::OpenAi,
            model: model.to_string(),
        })
    }
}
