//! # Domain Models
//!
//! Configuration and runtime state for chart data dependencies.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChartType`] | Validated registry key for one visual element |
//! | [`DataSourceConfig`] | One data origin (file, polled service, static dataset) |
//! | [`SourceLocation`] | Single path/endpoint or an ordered list of them |
//! | [`DataFreshnessConfig`] | Warning/error staleness thresholds |
//! | [`RefreshPolicy`] | Auto/manual/visibility refresh rules and retry budget |
//! | [`ChartDataDependency`] | Everything configured for one chart |
//! | [`DataSourceStatus`] | Live freshness state of one chart |
//! | [`ChartRefreshCapability`] | Derived refresh affordances for the UI |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Configuration types deserialize from camelCase JSON and reject invalid
//! combinations through [`ChartDataDependency::validate`].

mod chart_type;
mod config;
mod status;
mod timestamp;

pub use chart_type::ChartType;
pub use config::{
    ChartDataDependency, DataFormat, DataFreshnessConfig, DataSourceConfig, RefreshMethod,
    RefreshPolicy, SourceLocation, SourceType, UpdateFrequency, ValidationRules,
};
pub(crate) use status::update_source_for;
pub use status::{ChartRefreshCapability, DataSourceStatus, StatusKind, UpdateSource};
pub use timestamp::UtcDateTime;
