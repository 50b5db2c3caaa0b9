//! # Freshboard Core
//!
//! Data freshness evaluation and refresh orchestration for dashboard charts.
//!
//! ## Overview
//!
//! Every chart on a dashboard declares where its data comes from and how
//! old that data may get. This crate decides, per chart:
//!
//! - **whether the data is fresh enough** to display (`available`, `stale`,
//!   `error`, `missing`, `refreshing`)
//! - **whether and how it can be refreshed** (manual, interval, visibility,
//!   file change)
//! - **how concurrent refreshes run** without overloading external services
//!   or corrupting cached state
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Source adapters (file watch, polled services, static datasets) |
//! | [`cache`] | In-memory cache of the last good records per chart |
//! | [`config`] | Engine configuration document and registry settings |
//! | [`data_source`] | Source adapter trait and structured source errors |
//! | [`domain`] | Chart dependencies, sources, policies and statuses |
//! | [`engine`] | Composition root and lifecycle |
//! | [`error`] | Configuration and validation errors |
//! | [`freshness`] | Pure freshness evaluation |
//! | [`refresh`] | Refresh requests, results and progress |
//! | [`registry`] | Dependency registry and status store |
//! | [`retry`] | Retry budget and backoff |
//! | [`scheduler`] | Admission, dedup, retry, fallback and triggers |
//! | [`service_client`] | External service transport |
//! | [`service_policy`] | Per-service quotas and credentials |
//! | [`status_board`] | Read-only status queries and subscriptions |
//! | [`telemetry`] | Tracing subscriber setup |
//! | [`throttling`] | Per-service token buckets |
//! | [`validation`] | Record validation |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use freshboard_core::{ChartType, EngineConfig, FreshnessEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_path("freshboard.json")?;
//!     let (engine, report) = FreshnessEngine::from_config(config)?;
//!     for rejected in &report.rejected {
//!         eprintln!("skipped: {rejected}");
//!     }
//!
//!     engine.start().await;
//!     let chart = ChartType::parse("usage-trend")?;
//!     if engine.should_block_render(&chart).await {
//!         let result = engine.refresh(&chart).await;
//!         println!("refreshed: {}", result.success);
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Dashboard / UI │
//! └────────┬────────┘
//!          │ status, subscribe, request_refresh
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ FreshnessEngine │────▶│   StatusBoard    │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ RefreshScheduler│────▶│DependencyRegistry│
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Source Adapters │────▶│ Service Client   │
//! │ (file, poll,    │     │ (reqwest/custom) │
//! │  static)        │     └──────────────────┘
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Adapter failures are structured values, never panics:
//!
//! ```rust
//! use freshboard_core::{SourceError, SourceErrorKind};
//!
//! fn handle_error(error: SourceError) {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited | SourceErrorKind::Timeout => {
//!             // The scheduler retries these within the chart's budget
//!         }
//!         SourceErrorKind::Unauthorized => {
//!             // Configure a credential for the service
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Service credentials are read from environment variables or injected
//!   explicitly, and are never logged

pub mod adapters;
mod admission;
pub mod cache;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod error;
pub mod freshness;
pub mod refresh;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service_client;
pub mod service_policy;
pub mod status_board;
pub mod telemetry;
pub mod throttling;
pub mod validation;

// Adapter implementations
pub use adapters::{
    AdapterSet, FileChangeEvent, FileWatchAdapter, PollingServiceAdapter, StaticAdapter,
};

// Caching
pub use cache::{CacheStore, CachedData};

// Configuration
pub use config::{EngineConfig, RegistrySettings};

// Data source trait and types
pub use data_source::{
    AdapterCapabilities, AdapterFuture, FetchRequest, FetchedData, Record, SourceAdapter,
    SourceCheck, SourceError, SourceErrorKind,
};

// Domain models
pub use domain::{
    ChartDataDependency, ChartRefreshCapability, ChartType, DataFormat, DataFreshnessConfig,
    DataSourceConfig, DataSourceStatus, RefreshMethod, RefreshPolicy, SourceLocation, SourceType,
    StatusKind, UpdateFrequency, UpdateSource, UtcDateTime, ValidationRules,
};

// Engine
pub use engine::{EngineBuilder, FreshnessEngine};

// Error types
pub use error::{ConfigError, CoreError, ValidationError};

// Freshness evaluation
pub use freshness::{evaluate, FreshnessVerdict};

// Refresh operations
pub use refresh::{
    DataRefreshProgress, DataRefreshRequest, DataRefreshResult, ProgressStage, RefreshError,
    RefreshPriority, RefreshTrigger, SourceOrigin, SourcePosition,
};

// Registry
pub use registry::{DependencyRegistry, LoadReport, RegistryEntry, StatusChange};

// Retry logic
pub use retry::{Backoff, RetryPlan};

// Scheduling
pub use scheduler::RefreshScheduler;

// External services
pub use service_client::{
    ReqwestServiceClient, ServiceClient, ServiceError, ServiceRequest, ServiceResponse,
};
pub use service_policy::{CredentialStore, ServicePolicy};

// Status reporting
pub use status_board::{StatusBoard, StatusSubscription, SubscriptionHandle};

// Throttling
pub use throttling::ServiceRateLimiters;

// Validation
pub use validation::{CustomValidator, ValidatorSet};
