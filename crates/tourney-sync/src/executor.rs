// Resilient request executor.
//
// Issues one logical request against the backend with a fixed per-attempt
// timeout and a bounded number of constant-delay retries, then translates
// whatever went wrong into exactly one `ApiError`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use tourney_core::config::ApiConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure surfaced by the executor once its retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Server connection timeout - please try again")]
    Timeout,

    #[error("Server error - please try again later")]
    ServerError,

    #[error("Unable to reach server - please check your connection")]
    Unreachable,

    /// Structured rejection from the backend, surfaced verbatim.
    #[error("{0}")]
    Remote(String),

    /// 2xx response whose body could not be decoded.
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Timeouts, unreachable hosts and 5xx answers; the caller may try later.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::Timeout | Self::ServerError | Self::Unreachable)
    }
}

/// Low-level transport failure for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Requests and transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path below the base URL, e.g. `/api/tournaments/7`.
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// One HTTP round trip. Implementations do not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest`-backed transport that sends JSON with the proxy bypass header.
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    bypass_header: String,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bypass_header: config.bypass_header.clone(),
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self
            .http
            .request(method, &url)
            .header("content-type", "application/json")
            .header(self.bypass_header.as_str(), "true");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(ApiResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    /// Retries after the first attempt; total attempts is one more.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(5_000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

impl From<&ApiConfig> for RetryPolicy {
    fn from(config: &ApiConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(config.request_timeout_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// Outcome of one attempt that did not succeed.
#[derive(Debug)]
enum AttemptFailure {
    /// Worth another attempt. `message` is the backend's own explanation
    /// when the body carried one.
    Retryable {
        kind: ApiError,
        message: Option<String>,
    },
    /// Give up immediately.
    Fatal(ApiError),
}

/// Pull `message` out of a `{ "message": "..." }` error body.
fn remote_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// RequestExecutor
// ---------------------------------------------------------------------------

/// Stateless; clones share the transport and may run concurrently.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `request` until it succeeds, fails fatally, or exhausts
    /// `max_retries`, sleeping `retry_delay` between attempts.
    pub async fn execute<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let total_attempts = self.policy.max_retries.saturating_add(1);
        let mut last_failure = None;

        for attempt in 1..=total_attempts {
            match self.attempt(request).await {
                Ok(body) => {
                    debug!("API request {} succeeded on attempt {}", request.path, attempt);
                    return serde_json::from_str(&body)
                        .map_err(|e| ApiError::InvalidResponse(e.to_string()));
                }
                Err(AttemptFailure::Fatal(err)) => {
                    warn!("API request {} rejected: {}", request.path, err);
                    return Err(err);
                }
                Err(AttemptFailure::Retryable { kind, message }) => {
                    warn!(
                        "API request attempt {} failed for {}: {}",
                        attempt, request.path, kind
                    );
                    last_failure = Some((kind, message));
                    if attempt < total_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        match last_failure {
            Some((_, Some(message))) => Err(ApiError::Remote(message)),
            Some((kind, None)) => Err(kind),
            None => Err(ApiError::Unreachable),
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<String, AttemptFailure> {
        let sent = tokio::time::timeout(self.policy.attempt_timeout, self.transport.send(request));

        let response = match sent.await {
            Err(_elapsed) => {
                return Err(AttemptFailure::Retryable {
                    kind: ApiError::Timeout,
                    message: None,
                })
            }
            Ok(Err(TransportError::Timeout)) => {
                return Err(AttemptFailure::Retryable {
                    kind: ApiError::Timeout,
                    message: None,
                })
            }
            Ok(Err(TransportError::Connect(_) | TransportError::Other(_))) => {
                return Err(AttemptFailure::Retryable {
                    kind: ApiError::Unreachable,
                    message: None,
                })
            }
            Ok(Ok(response)) => response,
        };

        match response.status {
            200..=299 => Ok(response.body),
            500..=599 => Err(AttemptFailure::Retryable {
                kind: ApiError::ServerError,
                message: remote_message(&response.body),
            }),
            status => {
                let message = remote_message(&response.body)
                    .unwrap_or_else(|| format!("Request failed with status code {status}"));
                Err(AttemptFailure::Fatal(ApiError::Remote(message)))
            }
        }
    }
}
