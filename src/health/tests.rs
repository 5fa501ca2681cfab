use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::HealthMonitor;
use crate::core::types::{ConnectionState, ProviderId, ProviderUpdate};
use crate::detection::{DETECTION_THROTTLE, ModelDetector};
use crate::registry::ProviderRegistry;
use crate::test_support::{MockResponse, MockServer, closed_port_url};

const WAIT: Duration = Duration::from_secs(5);

fn monitor_for(registry: &Arc<ProviderRegistry>) -> HealthMonitor {
    let detector = ModelDetector::with_settings(Arc::clone(registry), 2_000, DETECTION_THROTTLE)
        .expect("detector settings are valid");
    HealthMonitor::new(Arc::new(detector))
}

fn local_registry(base_url: &str) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::default());
    registry.update(
        ProviderId::Ollama,
        ProviderUpdate {
            base_url: Some(base_url.to_string()),
            ..ProviderUpdate::default()
        },
    );
    registry
}

fn cloud_registry() -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::default());
    registry.update(
        ProviderId::Gemini,
        ProviderUpdate {
            credential: Some("g-key".to_string()),
            enabled: Some(true),
            ..ProviderUpdate::default()
        },
    );
    registry.update(
        ProviderId::OpenAi,
        ProviderUpdate {
            enabled: Some(true),
            ..ProviderUpdate::default()
        },
    );
    registry
        .set_active(ProviderId::OpenAi)
        .expect("builtin provider is registered");
    registry
}

async fn wait_for_state<F>(rx: &mut watch::Receiver<ConnectionState>, predicate: F) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("state should arrive in time")
        .expect("monitor should still be alive")
        .clone()
}

#[tokio::test]
async fn test_cloud_state_follows_configuration() {
    let registry = cloud_registry();
    let monitor = monitor_for(&registry);
    assert_eq!(monitor.state(), ConnectionState::Idle);

    assert_eq!(
        monitor.check_now(false).await,
        ConnectionState::Disconnected {
            provider: Some(ProviderId::OpenAi),
            reason: "API key required".to_string(),
        }
    );

    registry
        .set_active(ProviderId::Gemini)
        .expect("builtin provider is registered");
    let state = monitor.check_now(false).await;
    assert_eq!(
        state,
        ConnectionState::Connected {
            provider: ProviderId::Gemini,
            model: "gemini-pro".to_string(),
        }
    );
    assert_eq!(monitor.state(), state);

    registry.update(
        ProviderId::Gemini,
        ProviderUpdate {
            enabled: Some(false),
            ..ProviderUpdate::default()
        },
    );
    assert!(!monitor.check_now(false).await.is_connected());
}

#[tokio::test]
async fn test_local_state_uses_detection() {
    let mut server = MockServer::start(vec![MockResponse::json(
        r#"{"models":[{"name":"llama2"},{"name":"mistral"}]}"#,
    )]);
    let registry = local_registry(&server.url());
    let monitor = monitor_for(&registry);

    assert_eq!(
        monitor.check_now(true).await,
        ConnectionState::Connected {
            provider: ProviderId::Ollama,
            model: "llama2".to_string(),
        }
    );
    server.shutdown();
}

#[tokio::test]
async fn test_unreachable_local_server_is_disconnected_with_reason() {
    let registry = local_registry(&closed_port_url());
    let monitor = monitor_for(&registry);

    match monitor.check_now(true).await {
        ConnectionState::Disconnected { provider, reason } => {
            assert_eq!(provider, Some(ProviderId::Ollama));
            assert!(reason.contains("unreachable"), "unexpected reason: {reason}");
        }
        other => panic!("expected disconnected state, got {other:?}"),
    }
}

#[tokio::test]
async fn test_checks_never_overlap() {
    let mut server = MockServer::start(vec![
        MockResponse::json(r#"{"models":["llama2"]}"#).delayed(Duration::from_millis(300)),
    ]);
    let registry = local_registry(&server.url());
    let monitor = monitor_for(&registry);

    let (first, second) = tokio::join!(monitor.check_now(true), monitor.check_now(true));
    assert!(first.is_connected());
    assert_eq!(second, ConnectionState::Checking);

    server.shutdown();
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_run_rechecks_when_active_provider_changes() {
    let registry = cloud_registry();
    let monitor = Arc::new(monitor_for(&registry).with_interval(Duration::from_secs(3_600)));
    let mut state_rx = monitor.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

    wait_for_state(&mut state_rx, |state| {
        matches!(state, ConnectionState::Disconnected { .. })
    })
    .await;

    registry
        .set_active(ProviderId::Gemini)
        .expect("builtin provider is registered");
    let state = wait_for_state(&mut state_rx, ConnectionState::is_connected).await;
    assert_eq!(
        state,
        ConnectionState::Connected {
            provider: ProviderId::Gemini,
            model: "gemini-pro".to_string(),
        }
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("monitor should stop after cancellation")
        .expect("monitor task should not panic");
}

#[tokio::test]
async fn test_refresh_forces_local_detection() {
    let mut server = MockServer::start(vec![
        MockResponse::json(r#"{"models":["llama2"]}"#),
        MockResponse::json(r#"{"models":["mistral"]}"#),
    ]);
    let registry = local_registry(&server.url());
    let monitor = Arc::new(monitor_for(&registry).with_interval(Duration::from_secs(3_600)));
    let mut state_rx = monitor.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

    wait_for_state(&mut state_rx, |state| {
        matches!(state, ConnectionState::Connected { model, .. } if model == "llama2")
    })
    .await;

    monitor.request_refresh();
    wait_for_state(&mut state_rx, |state| {
        matches!(state, ConnectionState::Connected { model, .. } if model == "mistral")
    })
    .await;

    cancel.cancel();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("monitor should stop after cancellation")
        .expect("monitor task should not panic");
    server.shutdown();
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn test_run_stops_on_cancellation_between_ticks() {
    let registry = cloud_registry();
    let monitor = Arc::new(monitor_for(&registry).with_interval(Duration::from_millis(20)));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("monitor should stop after cancellation")
        .expect("monitor task should not panic");

    assert!(matches!(
        monitor.state(),
        ConnectionState::Disconnected { .. }
    ));
}
