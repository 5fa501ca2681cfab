use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ConfigError, ProviderError};
use crate::core::types::{AdapterContext, ProviderId};
use crate::test_support::{MockResponse, MockServer, closed_port_url};
use crate::transport::http::{HttpTransport, RetryPolicy};

#[derive(Debug, Deserialize, PartialEq, Eq)]
struct OkResponse {
    ok: bool,
}

#[test]
fn test_transport_rejects_zero_timeout_and_invalid_retry() {
    assert_eq!(
        HttpTransport::new(0, RetryPolicy::default()).err(),
        Some(ConfigError::InvalidTimeout {
            name: "transport",
            timeout_ms: 0
        })
    );
    assert!(matches!(
        HttpTransport::new(
            1_000,
            RetryPolicy {
                max_attempts: 3,
                backoff_ms: 0
            }
        ),
        Err(ConfigError::InvalidRetryPolicy { .. })
    ));
    assert!(matches!(
        HttpTransport::new(
            1_000,
            RetryPolicy {
                max_attempts: 0,
                backoff_ms: 0
            }
        ),
        Err(ConfigError::InvalidRetryPolicy { .. })
    ));
}

#[tokio::test]
async fn test_http_transport_maps_status_errors_with_body() {
    let mut server = MockServer::start(vec![MockResponse::status(
        429,
        r#"{"error":"rate limit"}"#,
    )]);
    let transport =
        HttpTransport::new(1_000, RetryPolicy::single_retry(0)).expect("create transport");

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::OpenAi,
            Some("gpt-4"),
            &format!("{}/status", server.url()),
            &AdapterContext::default(),
        )
        .await;

    match result {
        Err(ProviderError::Status {
            provider,
            model,
            status_code,
            body,
        }) => {
            assert_eq!(provider, ProviderId::OpenAi);
            assert_eq!(model, Some("gpt-4".to_string()));
            assert_eq!(status_code, 429);
            assert_eq!(body, r#"{"error":"rate limit"}"#);
        }
        other => panic!("expected ProviderError::Status, got {other:?}"),
    }

    server.shutdown();
    assert_eq!(server.request_count(), 1, "status errors are never retried");
}

#[tokio::test]
async fn test_slow_server_yields_timeout_not_unreachable() {
    let mut server = MockServer::start(vec![
        MockResponse::json(r#"{"ok":true}"#).delayed(Duration::from_millis(1_500)),
    ]);
    let transport = HttpTransport::new(200, RetryPolicy::no_retry()).expect("create transport");

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::Ollama,
            Some("llama2"),
            &format!("{}/slow", server.url()),
            &AdapterContext::default(),
        )
        .await;

    assert_eq!(
        result,
        Err(ProviderError::Timeout {
            provider: ProviderId::Ollama,
            model: Some("llama2".to_string()),
            timeout_ms: 200,
        })
    );
    server.shutdown();
}

#[tokio::test]
async fn test_closed_port_yields_unreachable() {
    let transport = HttpTransport::new(2_000, RetryPolicy::no_retry()).expect("create transport");

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::Ollama,
            None,
            &format!("{}/api/version", closed_port_url()),
            &AdapterContext::default(),
        )
        .await;

    assert!(
        matches!(result, Err(ProviderError::Unreachable { .. })),
        "got {result:?}"
    );
}

#[test]
fn test_retry_policy_only_retries_unreachable_once() {
    let policy = RetryPolicy::single_retry(0);
    let unreachable = ProviderError::Unreachable {
        provider: ProviderId::OpenAi,
        model: None,
        message: "connection refused".to_string(),
    };
    let timeout = ProviderError::Timeout {
        provider: ProviderId::OpenAi,
        model: None,
        timeout_ms: 15_000,
    };

    assert!(policy.should_retry(1, &unreachable));
    assert!(!policy.should_retry(2, &unreachable));
    assert!(!policy.should_retry(1, &timeout));
    assert!(!RetryPolicy::no_retry().should_retry(1, &unreachable));
}

#[tokio::test]
async fn test_exhausted_retry_still_reports_unreachable() {
    let transport =
        HttpTransport::new(2_000, RetryPolicy::single_retry(0)).expect("create transport");

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::OpenAi,
            None,
            &format!("{}/ok", closed_port_url()),
            &AdapterContext::default(),
        )
        .await;

    assert!(matches!(result, Err(ProviderError::Unreachable { .. })));
}

#[tokio::test]
async fn test_non_json_success_body_is_malformed() {
    let mut server = MockServer::start(vec![MockResponse::json("<html>hello</html>")]);
    let transport = HttpTransport::new(1_000, RetryPolicy::no_retry()).expect("create transport");

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::Ollama,
            None,
            &format!("{}/api/models", server.url()),
            &AdapterContext::default(),
        )
        .await;

    assert!(matches!(result, Err(ProviderError::MalformedResponse { .. })));
    server.shutdown();
}

#[tokio::test]
async fn test_cancelled_context_abandons_request() {
    let mut server = MockServer::start(vec![
        MockResponse::json(r#"{"ok":true}"#).delayed(Duration::from_millis(800)),
    ]);
    let transport = HttpTransport::new(5_000, RetryPolicy::no_retry()).expect("create transport");
    let token = CancellationToken::new();
    let ctx = AdapterContext::with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let result = transport
        .get_json::<OkResponse>(
            ProviderId::Anthropic,
            Some("claude-3-haiku"),
            &format!("{}/slow", server.url()),
            &ctx,
        )
        .await;

    assert_eq!(
        result,
        Err(ProviderError::Cancelled {
            provider: ProviderId::Anthropic,
            model: Some("claude-3-haiku".to_string()),
        })
    );
    canceller.await.expect("canceller task");
    server.shutdown();
}

#[tokio::test]
async fn test_http_transport_injects_auth_headers_and_query() {
    let mut server = MockServer::start(vec![MockResponse::json(r#"{"ok":true}"#)]);
    let transport = HttpTransport::new(1_000, RetryPolicy::default()).expect("create transport");

    let mut ctx = AdapterContext::default();
    ctx.metadata.insert(
        "transport.auth.bearer_token".to_string(),
        "token-abc".to_string(),
    );
    ctx.metadata.insert(
        "transport.header.x-custom-header".to_string(),
        "custom-value".to_string(),
    );
    ctx.metadata
        .insert("transport.query.key".to_string(), "secret".to_string());

    let result = transport
        .post_json::<serde_json::Value, OkResponse>(
            ProviderId::OpenAi,
            Some("gpt-4"),
            &format!("{}/headers", server.url()),
            &serde_json::json!({"ping": true}),
            &ctx,
        )
        .await
        .expect("successful response");

    assert_eq!(result, OkResponse { ok: true });

    server.shutdown();
    let captured = server.requests();
    assert_eq!(captured.len(), 1);
    let first = &captured[0];
    assert_eq!(first.method, "POST");
    assert_eq!(first.path, "/headers?key=secret");
    assert_eq!(
        first.headers.get("authorization"),
        Some(&"Bearer token-abc".to_string())
    );
    assert_eq!(
        first.headers.get("x-custom-header"),
        Some(&"custom-value".to_string())
    );
    assert_eq!(first.json_body(), serde_json::json!({"ping": true}));
}
