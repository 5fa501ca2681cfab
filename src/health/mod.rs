use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::types::{ConnectionState, ProviderConfig};
use crate::detection::ModelDetector;
use crate::registry::ProviderRegistry;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps a live "is the active provider usable" signal for display.
///
/// Cloud providers are judged from configuration alone. The local provider
/// is probed through the [`ModelDetector`].
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    detector: Arc<ModelDetector>,
    interval: Duration,
    state_tx: watch::Sender<ConnectionState>,
    checking: AtomicBool,
    refresh: Notify,
}

/// Clears the in-flight flag even when a check is dropped mid-way.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HealthMonitor {
    pub fn new(detector: Arc<ModelDetector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            registry: Arc::clone(detector.registry()),
            detector,
            interval: DEFAULT_HEALTH_INTERVAL,
            state_tx,
            checking: AtomicBool::new(false),
            refresh: Notify::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Asks a running monitor to re-check now, forcing local detection.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Runs one check and publishes the result. If a check is already in
    /// flight this returns the current state without starting another.
    pub async fn check_now(&self, force: bool) -> ConnectionState {
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("health check already in flight");
            return self.state();
        }
        let _in_flight = InFlight(&self.checking);

        self.state_tx.send_replace(ConnectionState::Checking);
        let next = self.evaluate(force).await;
        match &next {
            ConnectionState::Connected { provider, model } => {
                debug!(%provider, %model, "provider connected")
            }
            ConnectionState::Disconnected { provider, reason } => {
                debug!(?provider, %reason, "provider disconnected")
            }
            ConnectionState::Idle | ConnectionState::Checking => {}
        }
        self.state_tx.send_replace(next.clone());
        next
    }

    /// Checks on every interval tick, on [`Self::request_refresh`] and on
    /// every active-provider change, until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut active_rx = self.registry.subscribe_active();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "health monitor started");

        loop {
            let force = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.refresh.notified() => true,
                Ok(()) = active_rx.changed() => {
                    let active = *active_rx.borrow_and_update();
                    debug!(?active, "active provider changed, re-checking");
                    false
                }
                _ = ticker.tick() => false,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.check_now(force) => {}
            }
        }

        info!("health monitor stopped");
    }

    async fn evaluate(&self, force: bool) -> ConnectionState {
        let Some(provider) = self.registry.active_id() else {
            return ConnectionState::Disconnected {
                provider: None,
                reason: "No provider selected".to_string(),
            };
        };
        let Some(config) = self.registry.get(provider) else {
            return ConnectionState::Disconnected {
                provider: Some(provider),
                reason: "Provider is not registered".to_string(),
            };
        };

        if config.is_local {
            let models = self.detector.detect(force).await;
            let config = self.registry.get(provider).unwrap_or(config);
            return local_state(&config, &models);
        }
        cloud_state(&config)
    }
}

fn local_state(config: &ProviderConfig, models: &[String]) -> ConnectionState {
    match models.first() {
        Some(first) => ConnectionState::Connected {
            provider: config.id,
            model: if models.contains(&config.selected_model) {
                config.selected_model.clone()
            } else {
                first.clone()
            },
        },
        None => ConnectionState::Disconnected {
            provider: Some(config.id),
            reason: config
                .last_error
                .clone()
                .unwrap_or_else(|| "No models detected".to_string()),
        },
    }
}

fn cloud_state(config: &ProviderConfig) -> ConnectionState {
    let reason = if !config.has_credential() {
        "API key required"
    } else if config.selected_model.is_empty() {
        "No model selected"
    } else if !config.enabled {
        "Provider is disabled"
    } else {
        return ConnectionState::Connected {
            provider: config.id,
            model: config.selected_model.clone(),
        };
    };

    ConnectionState::Disconnected {
        provider: Some(config.id),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests;
