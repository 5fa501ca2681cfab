use crate::core::types::ProviderId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid timeout for {name}: {timeout_ms} ms")]
    InvalidTimeout { name: &'static str, timeout_ms: u64 },
    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("invalid client settings: {reason}")]
    InvalidSettings { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },
    #[error("registry snapshot error: {message}")]
    Snapshot { message: String },
}

/// Adapter and transport level failures. Every variant carries the provider
/// that produced it so diagnostics never lose their origin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error(
        "provider timed out after {timeout_ms} ms{context}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Timeout {
        provider: ProviderId,
        model: Option<String>,
        timeout_ms: u64,
    },
    #[error(
        "provider unreachable{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Unreachable {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider status error{context}: {body}",
        context = format_context(Some(.provider), .model.as_deref(), Some(*.status_code))
    )]
    Status {
        provider: ProviderId,
        model: Option<String>,
        status_code: u16,
        body: String,
    },
    #[error(
        "provider returned a malformed response{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    MalformedResponse {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider serialization error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Serialization {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider protocol error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Protocol {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error("provider credential missing [provider={provider}]")]
    MissingCredential { provider: ProviderId },
    #[error(
        "provider call cancelled{context}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Cancelled {
        provider: ProviderId,
        model: Option<String>,
    },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Timeout { provider, .. }
            | Self::Unreachable { provider, .. }
            | Self::Status { provider, .. }
            | Self::MalformedResponse { provider, .. }
            | Self::Serialization { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::MissingCredential { provider }
            | Self::Cancelled { provider, .. } => *provider,
        }
    }
}

/// Errors surfaced to callers of the completion client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error(
        "no active provider is configured{context}",
        context = format_context(.provider.as_ref(), None, None)
    )]
    NoActiveProvider { provider: Option<ProviderId> },
    #[error("credential missing [provider={provider}]")]
    MissingCredential { provider: ProviderId },
    #[error(
        "request timed out after {timeout_ms} ms{context}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Timeout {
        provider: ProviderId,
        model: Option<String>,
        timeout_ms: u64,
    },
    #[error(
        "provider unreachable{context}: {message}{hint}",
        context = format_context(Some(.provider), .model.as_deref(), None),
        hint = unreachable_hint(*.provider)
    )]
    Unreachable {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "backend http error{context}: {body}",
        context = format_context(Some(.provider), .model.as_deref(), Some(*.status_code))
    )]
    BackendHttp {
        provider: ProviderId,
        model: Option<String>,
        status_code: u16,
        body: String,
    },
    #[error(
        "malformed response{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    MalformedResponse {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "invalid request{context}: {message}",
        context = format_context(.provider.as_ref(), None, None)
    )]
    InvalidRequest {
        provider: Option<ProviderId>,
        message: String,
    },
    #[error(
        "request cancelled{context}",
        context = format_context(Some(.provider), .model.as_deref(), None)
    )]
    Cancelled {
        provider: ProviderId,
        model: Option<String>,
    },
    #[error("no adapter registered [provider={provider}]")]
    AdapterNotRegistered { provider: ProviderId },
}

impl CompletionError {
    /// Text suitable for appending to a conversation in place of the agent's
    /// reply, so the user sees why no answer arrived.
    pub fn chat_message(&self) -> String {
        match self {
            Self::NoActiveProvider { .. } => "I can't respond yet: no language model provider is \
                 configured. Enable a provider and select a model in Settings."
                .to_string(),
            Self::MissingCredential { provider } => format!(
                "I can't respond yet: {provider} needs an API key. Add it in Settings."
            ),
            Self::Timeout {
                provider,
                timeout_ms,
                ..
            } => format!(
                "The model on {provider} took longer than {} seconds to answer. It may be slow \
                 or busy; try again or choose a smaller model.",
                timeout_ms / 1_000
            ),
            Self::Unreachable { provider, .. } if provider.is_local() => "I couldn't reach the \
                 local model server. Make sure it is running and that it accepts requests from \
                 this origin."
                .to_string(),
            Self::Unreachable { provider, .. } => format!(
                "I couldn't reach {provider}. Check your network connection and the base URL in \
                 Settings."
            ),
            Self::BackendHttp {
                provider,
                status_code,
                body,
                ..
            } => format!(
                "{provider} returned an error (HTTP {status_code}): {}",
                truncate_for_chat(body)
            ),
            Self::MalformedResponse { provider, .. } => {
                format!("{provider} sent a response I couldn't understand. Please try again.")
            }
            Self::InvalidRequest { message, .. } => {
                format!("The request couldn't be sent: {message}")
            }
            Self::Cancelled { .. } => "The request was cancelled.".to_string(),
            Self::AdapterNotRegistered { provider } => {
                format!("{provider} is not supported by this client.")
            }
        }
    }
}

impl From<ProviderError> for CompletionError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Timeout {
                provider,
                model,
                timeout_ms,
            } => Self::Timeout {
                provider,
                model,
                timeout_ms,
            },
            ProviderError::Unreachable {
                provider,
                model,
                message,
            } => Self::Unreachable {
                provider,
                model,
                message,
            },
            ProviderError::Status {
                provider,
                model,
                status_code,
                body,
            } => Self::BackendHttp {
                provider,
                model,
                status_code,
                body,
            },
            ProviderError::MalformedResponse {
                provider,
                model,
                message,
            } => Self::MalformedResponse {
                provider,
                model,
                message,
            },
            ProviderError::Serialization {
                provider, message, ..
            }
            | ProviderError::Protocol {
                provider, message, ..
            } => Self::InvalidRequest {
                provider: Some(provider),
                message,
            },
            ProviderError::MissingCredential { provider } => Self::MissingCredential { provider },
            ProviderError::Cancelled { provider, model } => Self::Cancelled { provider, model },
        }
    }
}

/// Why a detection attempt produced no models. The `Display` text is what
/// ends up in the provider's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionFailure {
    #[error("local model server unreachable at {base_url}: {message}")]
    Unreachable { base_url: String, message: String },
    #[error("local model server is reachable but has no models pulled")]
    NoModels,
    #[error("local model server returned a malformed model listing: {message}")]
    MalformedResponse { message: String },
}

fn unreachable_hint(provider: ProviderId) -> &'static str {
    if provider.is_local() {
        " (is the local model server running, and does it allow this origin (CORS)?)"
    } else {
        ""
    }
}

fn truncate_for_chat(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }

    let mut shortened: String = trimmed.chars().take(LIMIT).collect();
    shortened.push('…');
    shortened
}

fn format_context(
    provider: Option<&ProviderId>,
    model: Option<&str>,
    status_code: Option<u16>,
) -> String {
    let mut context = Vec::new();

    if let Some(provider) = provider {
        context.push(format!("provider={provider}"));
    }
    if let Some(model) = model {
        context.push(format!("model={model}"));
    }
    if let Some(status_code) = status_code {
        context.push(format!("status_code={status_code}"));
    }

    if context.is_empty() {
        String::new()
    } else {
        format!(" [{}]", context.join(", "))
    }
}
