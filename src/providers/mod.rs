use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{NO_RESPONSE_SENTINEL, ProviderConfig, ProviderId};
use crate::transport::http::RetryPolicy;

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

/// Timeout for local inference, which has no network latency bound but is slow.
pub const LOCAL_COMPLETION_TIMEOUT_MS: u64 = 30_000;
/// Timeout for cloud completion calls.
pub const CLOUD_COMPLETION_TIMEOUT_MS: u64 = 15_000;

/// Builds the stock adapter for `provider`. The retry policy is only honored
/// by cloud adapters; local calls are never retried.
pub fn builtin_adapter(
    provider: ProviderId,
    local_timeout_ms: u64,
    cloud_timeout_ms: u64,
    cloud_retry: RetryPolicy,
) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
    let adapter: Arc<dyn ProviderAdapter> = match provider {
        ProviderId::Ollama => Arc::new(ollama::OllamaAdapter::with_timeout(local_timeout_ms)?),
        ProviderId::OpenAi => Arc::new(openai::OpenAiAdapter::with_settings(
            cloud_timeout_ms,
            cloud_retry,
        )?),
        ProviderId::Anthropic => Arc::new(anthropic::AnthropicAdapter::with_settings(
            cloud_timeout_ms,
            cloud_retry,
        )?),
        ProviderId::Gemini => Arc::new(gemini::GeminiAdapter::with_settings(
            cloud_timeout_ms,
            cloud_retry,
        )?),
    };
    Ok(adapter)
}

pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

pub(crate) fn require_credential(config: &ProviderConfig) -> Result<String, ProviderError> {
    config
        .credential
        .as_deref()
        .map(str::trim)
        .filter(|credential| !credential.is_empty())
        .map(str::to_string)
        .ok_or(ProviderError::MissingCredential {
            provider: config.id,
        })
}

/// A 2xx body that is not JSON still counts as a completed call; it decodes
/// to the sentinel text instead of failing.
pub(crate) fn tolerate_malformed(
    result: Result<Value, ProviderError>,
) -> Result<Value, ProviderError> {
    match result {
        Err(ProviderError::MalformedResponse {
            provider, message, ..
        }) => {
            warn!(%provider, %message, "completion body was not json");
            Ok(Value::Null)
        }
        other => other,
    }
}

pub(crate) fn text_or_sentinel(provider: ProviderId, text: Option<String>) -> String {
    match text {
        Some(text) if !text.is_empty() => text,
        _ => {
            warn!(%provider, "completion response carried no text");
            NO_RESPONSE_SENTINEL.to_string()
        }
    }
}
