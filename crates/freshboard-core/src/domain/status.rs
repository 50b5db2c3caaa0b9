use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{RefreshMethod, SourceType, UtcDateTime};

/// Freshness state of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Available,
    Stale,
    Missing,
    Error,
    Refreshing,
}

impl StatusKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Stale => "stale",
            Self::Missing => "missing",
            Self::Error => "error",
            Self::Refreshing => "refreshing",
        }
    }

    /// Position on the `available → stale → error` degradation axis.
    /// `missing` and `refreshing` are off-axis.
    pub const fn severity(self) -> Option<u8> {
        match self {
            Self::Available => Some(0),
            Self::Stale => Some(1),
            Self::Error => Some(2),
            Self::Missing | Self::Refreshing => None,
        }
    }
}

impl Display for StatusKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced the most recent successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    Manual,
    Api,
    Scheduled,
}

/// Mutable runtime state of one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceStatus {
    pub status: StatusKind,
    pub last_updated_at: Option<UtcDateTime>,
    pub age_hours: f64,
    pub error: Option<String>,
    pub retry_count: u32,
    pub last_update_source: Option<UpdateSource>,
}

impl DataSourceStatus {
    pub fn missing() -> Self {
        Self {
            status: StatusKind::Missing,
            last_updated_at: None,
            age_hours: 0.0,
            error: None,
            retry_count: 0,
            last_update_source: None,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.status == StatusKind::Refreshing
    }

    /// True once any fetch has ever succeeded for this dependency.
    pub fn has_data(&self) -> bool {
        self.last_updated_at.is_some()
    }
}

impl Default for DataSourceStatus {
    fn default() -> Self {
        Self::missing()
    }
}

/// Derived, read-only view of how a chart can be refreshed right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRefreshCapability {
    pub can_refresh: bool,
    pub reason: String,
    pub available_methods: Vec<RefreshMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    pub requires_auth: bool,
}

impl ChartRefreshCapability {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            can_refresh: false,
            reason: reason.into(),
            available_methods: Vec::new(),
            estimated_duration_ms: None,
            requires_auth: false,
        }
    }
}

/// Maps the serving source type onto the recorded update origin.
pub(crate) fn update_source_for(source_type: SourceType) -> UpdateSource {
    match source_type {
        SourceType::CliApi => UpdateSource::Api,
        SourceType::Manual | SourceType::Static | SourceType::Hybrid => UpdateSource::Manual,
    }
}
