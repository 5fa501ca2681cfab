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
use crate::transport::http::{HttpTransport, QUERY_PARAM_PREFIX, RetryPolicy};

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub struct GeminiAdapter {
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiAdapter {
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

    /// Without the key; the transport appends it as a query parameter and
    /// strips the URL from any error it reports.
    fn generate_content_url(config: &ProviderConfig) -> String {
        format!(
            "{}/models/{}:generateContent",
            normalize_base_url(&config.base_url),
            config.selected_model
        )
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        req: &CompletionRequest,
        ctx: &AdapterContext,
    ) -> Result<CompletionResult, ProviderError> {
        let api_key = require_credential(config)?;
        let model = config.selected_model.as_str();
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: &req.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: req.options.temperature,
                max_output_tokens: req.options.max_tokens,
            },
        };

        let mut request_ctx = ctx.clone();
        request_ctx
            .metadata
            .insert(format!("{QUERY_PARAM_PREFIX}key"), api_key);

        let payload = tolerate_malformed(
            self.transport
                .post_json(
                    ProviderId::Gemini,
                    Some(model),
                    &Self::generate_content_url(config),
                    &body,
                    &request_ctx,
                )
                .await,
        )?;

        let text = serde_json::from_value::<GenerateContentResponse>(payload)
            .ok()
            .and_then(|decoded| decoded.candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text);

        Ok(CompletionResult {
            text: text_or_sentinel(ProviderId::Gemini, text),
            provider: ProviderId::Gemini,
            model: model.to_string(),
        })
    }
}
