//! Transport contract for externally polled services.
//!
//! The engine never depends on a provider's wire format: a client turns
//! `(endpoint, params, auth token)` into JSON data or a classified error.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// One call to an external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

impl ServiceRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            auth_token: None,
            timeout_ms: 10_000,
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Endpoint with `params` appended as a percent-encoded query string.
    pub fn url(&self) -> String {
        if self.params.is_empty() {
            return self.endpoint.clone();
        }

        let query = self
            .params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.endpoint)
    }
}

/// Successful provider payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub data: serde_json::Value,
}

impl ServiceResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { status: 200, data }
    }
}

/// Provider or transport failure, before engine classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    code: String,
    message: String,
    status: Option<u16>,
    retryable: bool,
}

impl ServiceError {
    /// Connection-level failure; retryable.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: String::from("transport"),
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: String::from("timeout"),
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    /// Non-2xx response. 408, 429 and 5xx are retryable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: format!("http_{status}"),
            message: message.into(),
            status: Some(status),
            retryable: matches!(status, 408 | 429 | 500..=599),
        }
    }

    /// Provider-specific error code with explicit retry hint.
    pub fn provider(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            retryable,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ServiceError {}

/// Future returned by [`ServiceClient::call`].
pub type ServiceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ServiceResponse, ServiceError>> + Send + 'a>>;

/// External service transport.
pub trait ServiceClient: Send + Sync {
    fn call<'a>(&'a self, request: ServiceRequest) -> ServiceFuture<'a>;
}

/// Production client using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestServiceClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestServiceClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("freshboard/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceClient for ReqwestServiceClient {
    fn call<'a>(&'a self, request: ServiceRequest) -> ServiceFuture<'a> {
        Box::pin(async move {
            let mut builder = self
                .client
                .get(request.url())
                .timeout(Duration::from_millis(request.timeout_ms));
            if let Some(token) = &request.auth_token {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    ServiceError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    ServiceError::transport(format!("connection failed: {e}"))
                } else {
                    ServiceError::transport(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| ServiceError::transport(format!("failed to read response body: {e}")))?;

            if !(200..300).contains(&status) {
                let snippet = body.chars().take(200).collect::<String>();
                return Err(ServiceError::from_status(
                    status,
                    format!("upstream returned status {status}: {snippet}"),
                ));
            }

            let data = serde_json::from_str(&body).map_err(|e| {
                ServiceError::provider(
                    "invalid_payload",
                    format!("response is not valid JSON: {e}"),
                    false,
                )
            })?;

            Ok(ServiceResponse { status, data })
        })
    }
}
