//! Source adapter contract and adapter-level error taxonomy.
//!
//! Every source type (manual file, polled service, static dataset) is served
//! by a [`SourceAdapter`]. The scheduler only ever talks to adapters through
//! this trait, and adapters only ever fail with a [`SourceError`].
//!
//! | Method | Cost | Purpose |
//! |--------|------|---------|
//! | [`check`](SourceAdapter::check) | cheap | availability + last update, no payload |
//! | [`fetch`](SourceAdapter::fetch) | full | retrieve, parse and validate records |
//! | [`capabilities`](SourceAdapter::capabilities) | free | refresh methods and auth needs |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::refresh::ProgressReporter;
use crate::validation::ValidatorSet;
use crate::{ChartType, DataSourceConfig, RefreshMethod, UtcDateTime, ValidationRules};

/// One fetched row, keyed by column name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Boxed future returned by adapter methods.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Result of a cheap availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCheck {
    pub available: bool,
    pub last_updated_at: Option<UtcDateTime>,
    /// Byte size for files, row count when an adapter knows it.
    pub size_hint: Option<u64>,
}

impl SourceCheck {
    pub const fn unavailable() -> Self {
        Self {
            available: false,
            last_updated_at: None,
            size_hint: None,
        }
    }

    pub const fn available_at(last_updated_at: UtcDateTime, size_hint: Option<u64>) -> Self {
        Self {
            available: true,
            last_updated_at: Some(last_updated_at),
            size_hint,
        }
    }
}

/// Records retrieved by a full fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedData {
    pub records: Vec<Record>,
    pub last_updated_at: UtcDateTime,
}

/// What an adapter can do for a given source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCapabilities {
    pub available_methods: Vec<RefreshMethod>,
    pub requires_auth: bool,
    pub estimated_duration_ms: Option<u64>,
}

/// Inputs of one adapter fetch.
#[derive(Clone, Copy)]
pub struct FetchRequest<'a> {
    pub chart_type: &'a ChartType,
    pub source: &'a DataSourceConfig,
    pub validation: Option<&'a ValidationRules>,
    pub validators: &'a ValidatorSet,
    pub progress: &'a ProgressReporter,
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    Timeout,
    Unauthorized,
    InvalidRequest,
    NotFound,
    Validation,
    AdapterNotRegistered,
    Internal,
}

/// Structured adapter error. Only `retryable` errors are retried; everything
/// else falls through to the next fallback source immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message, true)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unauthorized, message, false)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message, false)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Validation, message, false)
    }

    pub fn adapter_not_registered(source: &DataSourceConfig) -> Self {
        Self::new(
            SourceErrorKind::AdapterNotRegistered,
            format!("no adapter is registered for '{}' sources", source.source_type),
            false,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message, false)
    }

    fn new(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Validation => "source.validation",
            SourceErrorKind::AdapterNotRegistered => "source.adapter_not_registered",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Per-source-type adapter contract.
///
/// Implementations must be `Send + Sync`; the scheduler shares one instance
/// across every dependency of the same source type.
pub trait SourceAdapter: Send + Sync {
    /// Short adapter name used in logs.
    fn name(&self) -> &'static str;

    /// Probes availability without retrieving the payload.
    fn check<'a>(&'a self, source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck>;

    /// Retrieves, parses and validates the source's records.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] classified as retryable (transient transport
    /// or contention issues) or permanent (auth, missing data, validation).
    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData>;

    /// Refresh methods, auth requirement and expected duration for `source`.
    fn capabilities(&self, source: &DataSourceConfig) -> AdapterCapabilities;
}
