use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::error::{DetectionFailure, RegistryError};
use crate::core::types::{ProviderConfig, ProviderId, ProviderUpdate, RegistrySnapshot};
use crate::providers::anthropic::ANTHROPIC_DEFAULT_BASE_URL;
use crate::providers::gemini::GEMINI_DEFAULT_BASE_URL;
use crate::providers::ollama::OLLAMA_DEFAULT_BASE_URL;
use crate::providers::openai::OPENAI_DEFAULT_BASE_URL;

/// Single source of truth for provider settings and the active-provider
/// pointer. Shared as `Arc<ProviderRegistry>`; no lock is held across an await.
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    active_tx: watch::Sender<Option<ProviderId>>,
}

struct RegistryState {
    providers: IndexMap<ProviderId, ProviderEntry>,
    default_provider: Option<ProviderId>,
}

struct ProviderEntry {
    config: ProviderConfig,
    detection_sequence: u64,
}

/// Permission to run one detection attempt. Only the ticket carrying the
/// latest sequence number for its provider may write results back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionTicket {
    pub provider: ProviderId,
    pub sequence: u64,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionStart {
    Started(DetectionTicket),
    /// An attempt is in flight or ran recently; carries the last known models.
    Debounced(Vec<String>),
    UnknownProvider,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>, default_provider: Option<ProviderId>) -> Self {
        let providers: IndexMap<ProviderId, ProviderEntry> = providers
            .into_iter()
            .map(|config| {
                (
                    config.id,
                    ProviderEntry {
                        config,
                        detection_sequence: 0,
                    },
                )
            })
            .collect();
        let default_provider = default_provider.filter(|id| providers.contains_key(id));
        let (active_tx, _) = watch::channel(default_provider);

        Self {
            state: RwLock::new(RegistryState {
                providers,
                default_provider,
            }),
            active_tx,
        }
    }

    pub fn get(&self, provider: ProviderId) -> Option<ProviderConfig> {
        self.read_state()
            .providers
            .get(&provider)
            .map(|entry| entry.config.clone())
    }

    pub fn providers(&self) -> Vec<ProviderConfig> {
        self.read_state()
            .providers
            .values()
            .map(|entry| entry.config.clone())
            .collect()
    }

    /// Merges `update` into the provider's settings. Unknown providers are
    /// logged and ignored.
    pub fn update(&self, provider: ProviderId, update: ProviderUpdate) {
        let mut state = self.write_state();
        let Some(entry) = state.providers.get_mut(&provider) else {
            warn!(%provider, "ignoring update for unregistered provider");
            return;
        };
        apply_update(&mut entry.config, update);
    }

    pub fn set_active(&self, provider: ProviderId) -> Result<(), RegistryError> {
        {
            let mut state = self.write_state();
            if !state.providers.contains_key(&provider) {
                return Err(RegistryError::UnknownProvider {
                    provider: provider.to_string(),
                });
            }
            state.default_provider = Some(provider);
        }

        info!(%provider, "active provider changed");
        self.active_tx.send_if_modified(|active| {
            let changed = *active != Some(provider);
            *active = Some(provider);
            changed
        });
        Ok(())
    }

    pub fn set_active_by_name(&self, provider: &str) -> Result<(), RegistryError> {
        self.set_active(provider.parse()?)
    }

    pub fn active_id(&self) -> Option<ProviderId> {
        self.read_state().default_provider
    }

    /// The active provider, only if it is currently usable.
    pub fn get_active(&self) -> Option<ProviderConfig> {
        let state = self.read_state();
        let provider = state.default_provider?;
        state
            .providers
            .get(&provider)
            .map(|entry| &entry.config)
            .filter(|config| config.is_usable())
            .cloned()
    }

    /// Receiver that observes every change of the active provider.
    pub fn subscribe_active(&self) -> watch::Receiver<Option<ProviderId>> {
        self.active_tx.subscribe()
    }

    pub fn begin_detection(
        &self,
        provider: ProviderId,
        force: bool,
        throttle: Duration,
        now_ms: u64,
    ) -> DetectionStart {
        let mut state = self.write_state();
        let Some(entry) = state.providers.get_mut(&provider) else {
            return DetectionStart::UnknownProvider;
        };
        let config = &mut entry.config;

        if !force {
            let recently_attempted = config
                .last_detection_attempt_at_ms
                .is_some_and(|last| now_ms.saturating_sub(last) < duration_ms(throttle));
            if config.is_detecting || recently_attempted {
                debug!(%provider, in_flight = config.is_detecting, "detection debounced");
                return DetectionStart::Debounced(config.available_models.clone());
            }
        }

        entry.detection_sequence += 1;
        config.is_detecting = true;
        config.last_detection_attempt_at_ms = Some(now_ms);
        config.last_error = None;

        DetectionStart::Started(DetectionTicket {
            provider,
            sequence: entry.detection_sequence,
            base_url: config.base_url.clone(),
        })
    }

    /// Applies a detection outcome. Returns `false` (and changes nothing) when
    /// a newer attempt has been started since `ticket` was issued.
    pub fn finish_detection(
        &self,
        ticket: &DetectionTicket,
        outcome: &Result<Vec<String>, DetectionFailure>,
    ) -> bool {
        let mut state = self.write_state();
        let Some(entry) = state.providers.get_mut(&ticket.provider) else {
            return false;
        };

        if entry.detection_sequence != ticket.sequence {
            debug!(
                provider = %ticket.provider,
                sequence = ticket.sequence,
                latest = entry.detection_sequence,
                "discarding stale detection result"
            );
            return false;
        }

        let config = &mut entry.config;
        config.is_detecting = false;
        match outcome {
            Ok(models) => {
                if !models.contains(&config.selected_model) {
                    config.selected_model = models.first().cloned().unwrap_or_default();
                }
                config.available_models = models.clone();
                config.enabled = !models.is_empty();
                config.last_error = None;
            }
            Err(failure) => {
                config.available_models.clear();
                config.enabled = false;
                config.last_error = Some(failure.to_string());
            }
        }
        true
    }

    /// Clears the in-flight mark of an attempt that will never report back,
    /// such as a detection future dropped by a timeout. The attempt time is
    /// kept, so the throttle window still applies.
    pub fn abandon_detection(&self, ticket: &DetectionTicket) {
        let mut state = self.write_state();
        let Some(entry) = state.providers.get_mut(&ticket.provider) else {
            return;
        };
        if entry.detection_sequence == ticket.sequence && entry.config.is_detecting {
            debug!(
                provider = %ticket.provider,
                sequence = ticket.sequence,
                "detection abandoned before completion"
            );
            entry.config.is_detecting = false;
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read_state();
        RegistrySnapshot {
            default_provider: state.default_provider,
            providers: state
                .providers
                .values()
                .map(|entry| entry.config.clone())
                .collect(),
        }
    }

    /// Replaces the mutable state of registered providers from `snapshot`.
    /// Entries for providers this registry does not know are skipped.
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        let active = {
            let mut state = self.write_state();
            for mut config in snapshot.providers {
                let Some(entry) = state.providers.get_mut(&config.id) else {
                    warn!(provider = %config.id, "skipping snapshot entry for unregistered provider");
                    continue;
                };
                config.is_detecting = false;
                config.is_local = config.id.is_local();
                entry.config = config;
            }

            if let Some(provider) = snapshot
                .default_provider
                .filter(|provider| state.providers.contains_key(provider))
            {
                state.default_provider = Some(provider);
            }
            state.default_provider
        };

        self.active_tx.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }

    pub fn export_json(&self) -> Result<String, RegistryError> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|error| RegistryError::Snapshot {
            message: error.to_string(),
        })
    }

    pub fn import_json(&self, json: &str) -> Result<(), RegistryError> {
        let snapshot: RegistrySnapshot =
            serde_json::from_str(json).map_err(|error| RegistryError::Snapshot {
                message: error.to_string(),
            })?;
        self.restore(snapshot);
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(builtin_providers(), Some(ProviderId::Ollama))
    }
}

/// Stock provider table: cloud providers disabled with their static model
/// lists, the local provider disabled until detection finds models.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(ProviderId::Ollama, "Ollama (Local)", OLLAMA_DEFAULT_BASE_URL),
        ProviderConfig::new(ProviderId::OpenAi, "OpenAI", OPENAI_DEFAULT_BASE_URL).with_models(
            &["gpt-4", "gpt-4-turbo", "gpt-3.5-turbo"],
            "gpt-4",
        ),
        ProviderConfig::new(ProviderId::Anthropic, "Anthropic", ANTHROPIC_DEFAULT_BASE_URL)
            .with_models(
                &["claude-3-opus", "claude-3-sonnet", "claude-3-haiku"],
                "claude-3-sonnet",
            ),
        ProviderConfig::new(ProviderId::Gemini, "Google Gemini", GEMINI_DEFAULT_BASE_URL)
            .with_models(&["gemini-pro", "gemini-pro-vision"], "gemini-pro"),
    ]
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| duration_ms(elapsed))
        .unwrap_or_default()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn apply_update(config: &mut ProviderConfig, update: ProviderUpdate) {
    if let Some(display_name) = update.display_name {
        config.display_name = display_name;
    }
    if let Some(base_url) = update.base_url {
        config.base_url = base_url.trim().to_string();
    }
    if let Some(credential) = update.credential {
        let credential = credential.trim();
        config.credential = (!credential.is_empty()).then(|| credential.to_string());
    }
    if let Some(models) = update.available_models {
        config.available_models = models;
        if !config.available_models.is_empty()
            && !config.available_models.contains(&config.selected_model)
        {
            config.selected_model = config.available_models[0].clone();
        }
    }
    if let Some(selected_model) = update.selected_model {
        if selected_model.is_empty()
            || config.available_models.is_empty()
            || config.available_models.contains(&selected_model)
        {
            config.selected_model = selected_model;
        } else {
            warn!(
                provider = %config.id,
                model = %selected_model,
                "ignoring selection of a model the provider does not list"
            );
        }
    }
    if let Some(enabled) = update.enabled {
        config.enabled = enabled;
    }
}
