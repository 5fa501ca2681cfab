use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::ConfigError;
use crate::core::types::{ProviderId, ProviderUpdate};
use crate::detection::{DETECTION_THROTTLE, DETECTION_TIMEOUT_MS};
use crate::health::DEFAULT_HEALTH_INTERVAL;
use crate::prompt::DEFAULT_HISTORY_WINDOW;
use crate::providers::anthropic::ANTHROPIC_API_KEY_ENV;
use crate::providers::gemini::GEMINI_API_KEY_ENV;
use crate::providers::openai::OPENAI_API_KEY_ENV;
use crate::providers::{CLOUD_COMPLETION_TIMEOUT_MS, LOCAL_COMPLETION_TIMEOUT_MS};
use crate::registry::ProviderRegistry;
use crate::transport::http::RetryPolicy;

/// Overrides the local server address, using the same variable the server reads.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

/// Tunables for the client, detector and health monitor. Every field has a
/// default, so a partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub local_timeout_ms: u64,
    pub cloud_timeout_ms: u64,
    pub detection_timeout_ms: u64,
    pub detection_throttle_ms: u64,
    pub health_interval_ms: u64,
    pub history_window: usize,
    pub cloud_retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            local_timeout_ms: LOCAL_COMPLETION_TIMEOUT_MS,
            cloud_timeout_ms: CLOUD_COMPLETION_TIMEOUT_MS,
            detection_timeout_ms: DETECTION_TIMEOUT_MS,
            detection_throttle_ms: duration_ms(DETECTION_THROTTLE),
            health_interval_ms: duration_ms(DEFAULT_HEALTH_INTERVAL),
            history_window: DEFAULT_HISTORY_WINDOW,
            cloud_retry: RetryPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            serde_json::from_str(json).map_err(|error| ConfigError::InvalidSettings {
                reason: error.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, timeout_ms) in [
            ("local completion", self.local_timeout_ms),
            ("cloud completion", self.cloud_timeout_ms),
            ("detection", self.detection_timeout_ms),
            ("health interval", self.health_interval_ms),
        ] {
            if timeout_ms == 0 {
                return Err(ConfigError::InvalidTimeout { name, timeout_ms });
            }
        }
        if self.history_window == 0 {
            return Err(ConfigError::InvalidSettings {
                reason: "history_window must be >= 1".to_string(),
            });
        }
        self.cloud_retry.validate()
    }

    pub fn detection_throttle(&self) -> Duration {
        Duration::from_millis(self.detection_throttle_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Copies credentials and the local host override from the process
/// environment into `registry`. Returns the providers that were updated.
pub fn apply_env_credentials(registry: &ProviderRegistry) -> Vec<ProviderId> {
    apply_credentials_from(registry, |name| std::env::var(name).ok())
}

/// Same as [`apply_env_credentials`] with an explicit variable lookup.
///
/// A credential alone does not enable a cloud provider; the user still opts
/// in. Blank values are ignored.
pub fn apply_credentials_from<F>(registry: &ProviderRegistry, lookup: F) -> Vec<ProviderId>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup_non_blank = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let mut updated = Vec::new();

    for (provider, variable) in [
        (ProviderId::OpenAi, OPENAI_API_KEY_ENV),
        (ProviderId::Anthropic, ANTHROPIC_API_KEY_ENV),
        (ProviderId::Gemini, GEMINI_API_KEY_ENV),
    ] {
        if let Some(credential) = lookup_non_blank(variable) {
            debug!(%provider, variable, "credential loaded from environment");
            registry.update(
                provider,
                ProviderUpdate {
                    credential: Some(credential),
                    ..ProviderUpdate::default()
                },
            );
            updated.push(provider);
        }
    }

    if let Some(host) = lookup_non_blank(OLLAMA_HOST_ENV) {
        let base_url = local_base_url(&host);
        info!(%base_url, "local server address overridden from environment");
        registry.update(
            ProviderId::Ollama,
            ProviderUpdate {
                base_url: Some(base_url),
                ..ProviderUpdate::default()
            },
        );
        updated.push(ProviderId::Ollama);
    }

    updated
}

/// `OLLAMA_HOST` is commonly a bare `host:port`.
fn local_base_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
