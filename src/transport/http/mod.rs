use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::core::error::{ConfigError, ProviderError};
use crate::core::types::{AdapterContext, ProviderId};

pub(crate) const AUTH_BEARER_TOKEN_KEY: &str = "transport.auth.bearer_token";
pub(crate) const CUSTOM_HEADER_PREFIX: &str = "transport.header.";
pub(crate) const QUERY_PARAM_PREFIX: &str = "transport.query.";

/// Retry policy for connection-level failures.
///
/// Only `Unreachable` failures are retried; timeouts and HTTP status errors
/// are returned on the first occurrence. At most one retry is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub const MAX_ATTEMPTS_LIMIT: u32 = 2;

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    pub fn single_retry(backoff_ms: u64) -> Self {
        Self {
            max_attempts: 2,
            backoff_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.max_attempts > Self::MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!(
                    "max_attempts must be <= {}: {}",
                    Self::MAX_ATTEMPTS_LIMIT,
                    self.max_attempts
                ),
            });
        }
        Ok(())
    }

    fn should_retry(&self, attempt: u32, error: &ProviderError) -> bool {
        attempt < self.max_attempts && matches!(error, ProviderError::Unreachable { .. })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, retry_policy: RetryPolicy) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), timeout_ms, retry_policy)
    }

    pub fn with_client(
        client: reqwest::Client,
        timeout_ms: u64,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Self::validate_timeout(timeout_ms)?;
        retry_policy.validate()?;

        Ok(Self {
            client,
            retry_policy,
            timeout_ms,
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub async fn get_json<TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        ctx: &AdapterContext,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        self.execute_json_request(provider, model, Method::GET, url, None, ctx)
            .await
    }

    pub async fn post_json<TReq, TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        ctx: &AdapterContext,
    ) -> Result<TResp, ProviderError>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|error| ProviderError::Serialization {
            provider,
            model: model.map(str::to_string),
            message: error.to_string(),
        })?;

        self.execute_json_request(provider, model, Method::POST, url, Some(payload), ctx)
            .await
    }

    async fn execute_json_request<TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        ctx: &AdapterContext,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let request_config = build_request_config(provider, model, ctx)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(%provider, %method, url, attempt, "sending provider request");

            let outcome = self
                .execute_once(provider, model, &method, url, body.as_deref(), &request_config, ctx)
                .await;

            match outcome {
                Err(error) if self.retry_policy.should_retry(attempt, &error) => {
                    warn!(%provider, url, attempt, %error, "provider unreachable, retrying");
                    tokio::time::sleep(Duration::from_millis(self.retry_policy.backoff_ms)).await;
                }
                Err(error) => return Err(error),
                Ok((status, text)) => return decode_body(provider, model, status, &text),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_once(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        method: &Method,
        url: &str,
        body: Option<&[u8]>,
        request_config: &RequestConfig,
        ctx: &AdapterContext,
    ) -> Result<(StatusCode, String), ProviderError> {
        let mut request_builder = self
            .client
            .request(method.clone(), url)
            .headers(request_config.headers.clone());

        if !request_config.query.is_empty() {
            request_builder = request_builder.query(&request_config.query);
        }

        if let Some(payload) = body {
            request_builder = request_builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(payload.to_vec());
        }

        let exchange = async {
            let response = request_builder
                .send()
                .await
                .map_err(|error| classify_reqwest_error(provider, model, self.timeout_ms, error))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|error| classify_reqwest_error(provider, model, self.timeout_ms, error))?;
            Ok::<_, ProviderError>((status, text))
        };

        // Dropping `exchange` on timeout or cancellation abandons the request;
        // any late bytes from the server are never observed.
        tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => Err(ProviderError::Cancelled {
                provider,
                model: model.map(str::to_string),
            }),
            outcome = tokio::time::timeout(Duration::from_millis(self.timeout_ms), exchange) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider,
                        model: model.map(str::to_string),
                        timeout_ms: self.timeout_ms,
                    }),
                }
            }
        }
    }

    fn validate_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "transport",
                timeout_ms,
            });
        }
        Ok(())
    }
}

struct RequestConfig {
    headers: HeaderMap,
    query: Vec<(String, String)>,
}

fn build_request_config(
    provider: ProviderId,
    model: Option<&str>,
    ctx: &AdapterContext,
) -> Result<RequestConfig, ProviderError> {
    let mut headers = HeaderMap::new();
    let mut query = Vec::new();

    if let Some(token) = ctx.metadata.get(AUTH_BEARER_TOKEN_KEY) {
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
            ProviderError::Protocol {
                provider,
                model: model.map(str::to_string),
                message: format!("invalid bearer token header value: {error}"),
            }
        })?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);
    }

    for (key, value) in &ctx.metadata {
        if let Some(raw_name) = key.strip_prefix(CUSTOM_HEADER_PREFIX) {
            let header_name = HeaderName::from_bytes(raw_name.as_bytes()).map_err(|error| {
                ProviderError::Protocol {
                    provider,
                    model: model.map(str::to_string),
                    message: format!("invalid header name: {raw_name}: {error}"),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|error| ProviderError::Protocol {
                    provider,
                    model: model.map(str::to_string),
                    message: format!("invalid header value for {raw_name}: {error}"),
                })?;
            headers.insert(header_name, header_value);
        } else if let Some(name) = key.strip_prefix(QUERY_PARAM_PREFIX) {
            query.push((name.to_string(), value.clone()));
        }
    }

    Ok(RequestConfig { headers, query })
}

fn decode_body<TResp>(
    provider: ProviderId,
    model: Option<&str>,
    status: StatusCode,
    text: &str,
) -> Result<TResp, ProviderError>
where
    TResp: DeserializeOwned,
{
    if !status.is_success() {
        let status_code = status.as_u16();
        let body = if text.trim().is_empty() {
            format!("http status {status_code}")
        } else {
            text.to_string()
        };
        return Err(ProviderError::Status {
            provider,
            model: model.map(str::to_string),
            status_code,
            body,
        });
    }

    serde_json::from_str(text).map_err(|error| ProviderError::MalformedResponse {
        provider,
        model: model.map(str::to_string),
        message: error.to_string(),
    })
}

fn classify_reqwest_error(
    provider: ProviderId,
    model: Option<&str>,
    timeout_ms: u64,
    error: reqwest::Error,
) -> ProviderError {
    // The request URL may carry credentials as query parameters.
    let error = error.without_url();
    let model = model.map(str::to_string);
    if error.is_timeout() {
        return ProviderError::Timeout {
            provider,
            model,
            timeout_ms,
        };
    }
    if error.is_builder() {
        return ProviderError::Protocol {
            provider,
            model,
            message: error.to_string(),
        };
    }

    ProviderError::Unreachable {
        provider,
        model,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests;
