use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AdapterContext, CompletionRequest, CompletionResult, ProviderConfig, ProviderId,
};
use crate::providers::{
    CLOUD_COMPLETION_TIMEOUT_MS, normalize_base_url, require_credential, text_or_sentinel,
    tolerate_malformed,
};
use crate::transport::http::{CUSTOM_HEADER_PREFIX, HttpTransport, RetryPolicy};

pub const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<MessageParam<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicAdapter {
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

    fn messages_url(config: &ProviderConfig) -> String {
        format!("{}/messages", normalize_base_url(&config.base_url))
    }

    fn attach_transport_headers(ctx: &AdapterContext, api_key: String) -> AdapterContext {
        let mut request_ctx = ctx.clone();
        request_ctx
            .metadata
            .insert(format!("{CUSTOM_HEADER_PREFIX}x-api-key"), api_key);
        request_ctx.metadata.insert(
            format!("{CUSTOM_HEADER_PREFIX}anthropic-version"),
            ANTHROPIC_VERSION.to_string(),
        );
        request_ctx
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        req: &CompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<CompletionResult, ProviderError> {
        let api_key = require_credential(config)?;
        let model = config.selected_model.as_str();
        let body = MessagesRequest {
            model,
            messages: vec![MessageParam {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.options.temperature,
            max_tokens: req.options.max_tokens,
        };
        let request_ctx = Self::attach_transport_headers(ctx, api_key);

        let payload = tolerate_malformed(
            self.transport
                .post_json(
                    ProviderId::Anthropic,
                    Some(model),
                    &Self::messages_url(config),
                    &body,
                    &request_ctx,
                )
                .await,
        )?;

        let text = serde_json::from_value::<MessagesResponse>(payload)
            .ok()
            .and_then(|decoded| decoded.content.into_iter().next())
            .and_then(|block| block.text);

        Ok(CompletionResult {
            text: text_or_sentinel(ProviderId::Anthropic, text),
            provider: ProviderId::Anthropic,
            model: model.to_string(),
        })
    }
}
