use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::error::{ConfigError, DetectionFailure, ProviderError};
use crate::core::types::{AdapterContext, ProviderId};
use crate::providers::normalize_base_url;
use crate::providers::ollama::{MODELS_PATH, TAGS_PATH, VERSION_PATH};
use crate::registry::{DetectionStart, DetectionTicket, ProviderRegistry, now_unix_ms};
use crate::transport::http::{HttpTransport, RetryPolicy};

pub const DETECTION_TIMEOUT_MS: u64 = 10_000;
pub const DETECTION_THROTTLE: Duration = Duration::from_secs(30);

/// Discovers which models the local server has installed and writes the
/// result into the shared registry.
pub struct ModelDetector {
    registry: Arc<ProviderRegistry>,
    transport: HttpTransport,
    throttle: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelListing {
    Models { models: Vec<ModelEntry> },
    Tags { tags: Vec<ModelEntry> },
    Data { data: Vec<ModelEntry> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelEntry {
    Bare(String),
    Named { name: String },
    Model { model: String },
    Id { id: String },
    Unrecognized(Value),
}

impl ModelEntry {
    fn into_name(self) -> Option<String> {
        match self {
            Self::Bare(name)
            | Self::Named { name }
            | Self::Model { model: name }
            | Self::Id { id: name } => Some(name),
            Self::Unrecognized(_) => None,
        }
    }
}

impl ModelListing {
    fn into_entries(self) -> Vec<ModelEntry> {
        match self {
            Self::Models { models } => models,
            Self::Tags { tags } => tags,
            Self::Data { data } => data,
        }
    }
}

impl ModelDetector {
    pub fn new(registry: Arc<ProviderRegistry>) -> Result<Self, ConfigError> {
        Self::with_settings(registry, DETECTION_TIMEOUT_MS, DETECTION_THROTTLE)
    }

    pub fn with_settings(
        registry: Arc<ProviderRegistry>,
        timeout_ms: u64,
        throttle: Duration,
    ) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(timeout_ms, RetryPolicy::no_retry())?;
        Ok(Self {
            registry,
            transport,
            throttle,
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Refreshes the local model list and returns it.
    ///
    /// Never fails: problems land in the provider's `last_error` and yield an
    /// empty list. Unforced calls inside the throttle window, or while another
    /// attempt is in flight, return the last known list without any I/O.
    pub async fn detect(&self, force: bool) -> Vec<String> {
        let ticket = match self.registry.begin_detection(
            ProviderId::Ollama,
            force,
            self.throttle,
            now_unix_ms(),
        ) {
            DetectionStart::Started(ticket) => ticket,
            DetectionStart::Debounced(models) => return models,
            DetectionStart::UnknownProvider => {
                warn!("local provider is not registered, skipping detection");
                return Vec::new();
            }
        };

        debug!(sequence = ticket.sequence, base_url = %ticket.base_url, "detecting local models");
        let base_url = ticket.base_url.clone();
        let mut pending = PendingDetection {
            registry: self.registry.as_ref(),
            ticket: Some(ticket),
        };
        let outcome = self.probe(&base_url).await;
        match &outcome {
            Ok(models) => info!(count = models.len(), "local models detected"),
            Err(failure) => warn!(%failure, "local model detection failed"),
        }

        if pending.finish(&outcome) {
            outcome.unwrap_or_default()
        } else {
            self.registry
                .get(ProviderId::Ollama)
                .map(|config| config.available_models)
                .unwrap_or_default()
        }
    }

    async fn probe(&self, base_url: &str) -> Result<Vec<String>, DetectionFailure> {
        let base_url = normalize_base_url(base_url);
        let ctx = AdapterContext::default();
        let mut malformed = None;

        for path in [MODELS_PATH, TAGS_PATH] {
            match self.fetch_listing(&base_url, path, &ctx).await {
                Ok(models) if !models.is_empty() => return Ok(models),
                Ok(_) => debug!(path, "model listing was empty"),
                Err(ListingError::Malformed(message)) => {
                    debug!(path, %message, "model listing was malformed");
                    if malformed.is_none() {
                        malformed = Some(message);
                    }
                }
                Err(ListingError::Request(error)) => debug!(path, %error, "model listing failed"),
            }
        }

        let liveness = self
            .transport
            .get_json::<Value>(
                ProviderId::Ollama,
                None,
                &format!("{base_url}{VERSION_PATH}"),
                &ctx,
            )
            .await;
        match liveness {
            Ok(_) | Err(ProviderError::MalformedResponse { .. }) => Err(malformed
                .map(|message| DetectionFailure::MalformedResponse { message })
                .unwrap_or(DetectionFailure::NoModels)),
            Err(error) => Err(DetectionFailure::Unreachable {
                base_url,
                message: error.to_string(),
            }),
        }
    }

    async fn fetch_listing(
        &self,
        base_url: &str,
        path: &str,
        ctx: &AdapterContext,
    ) -> Result<Vec<String>, ListingError> {
        let payload = self
            .transport
            .get_json::<Value>(ProviderId::Ollama, None, &format!("{base_url}{path}"), ctx)
            .await
            .map_err(|error| match error {
                ProviderError::MalformedResponse { message, .. } => ListingError::Malformed(message),
                other => ListingError::Request(other),
            })?;
        decode_listing(payload).map_err(ListingError::Malformed)
    }
}

/// Holds a detection ticket until its outcome is recorded. Dropping it
/// earlier, when the `detect` future is cancelled, releases the in-flight mark.
struct PendingDetection<'a> {
    registry: &'a ProviderRegistry,
    ticket: Option<DetectionTicket>,
}

impl PendingDetection<'_> {
    fn finish(&mut self, outcome: &Result<Vec<String>, DetectionFailure>) -> bool {
        self.ticket
            .take()
            .is_some_and(|ticket| self.registry.finish_detection(&ticket, outcome))
    }
}

impl Drop for PendingDetection<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.registry.abandon_detection(&ticket);
        }
    }
}

enum ListingError {
    Request(ProviderError),
    Malformed(String),
}

/// Normalizes any accepted listing shape to trimmed, non-empty, unique names
/// in server order.
fn decode_listing(payload: Value) -> Result<Vec<String>, String> {
    let listing: ModelListing =
        serde_json::from_value(payload).map_err(|_| "unrecognized model listing".to_string())?;

    let mut models: Vec<String> = Vec::new();
    for name in listing
        .into_entries()
        .into_iter()
        .filter_map(ModelEntry::into_name)
    {
        let name = name.trim();
        if !name.is_empty() && !models.iter().any(|known| known == name) {
            models.push(name.to_string());
        }
    }
    Ok(models)
}
