use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;
use crate::{ChartType, ConfigError, UtcDateTime};

/// Origin category of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Files dropped in place by a person or an external job.
    Manual,
    /// Data polled from an external service.
    CliApi,
    /// Immutable historical datasets.
    Static,
    /// Sources that can be synced from either a file or a service.
    Hybrid,
}

impl SourceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::CliApi => "cli-api",
            Self::Static => "static",
            Self::Hybrid => "hybrid",
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a source can be brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMethod {
    Never,
    FileWatch,
    ApiPoll,
    UserTrigger,
    HybridSync,
}

impl RefreshMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::FileWatch => "file-watch",
            Self::ApiPoll => "api-poll",
            Self::UserTrigger => "user-trigger",
            Self::HybridSync => "hybrid-sync",
        }
    }
}

impl Display for RefreshMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory update cadence of the upstream data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateFrequency {
    Never,
    #[default]
    OnDemand,
    Scheduled,
    RealTime,
    EventDriven,
}

/// Payload encoding of file-backed sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    Csv,
}

/// One path/endpoint or an ordered set of them.
///
/// Configuration accepts either a bare string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceLocation {
    Single(String),
    Multi(Vec<String>),
}

impl SourceLocation {
    pub fn iter(&self) -> impl Iterator<Item = &str> + Send + '_ {
        let locations = match self {
            Self::Single(location) => std::slice::from_ref(location),
            Self::Multi(locations) => locations.as_slice(),
        };
        locations.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(location) => Some(location.as_str()),
            Self::Multi(locations) => locations.first().map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(location) => location.trim().is_empty(),
            Self::Multi(locations) => locations.iter().all(|l| l.trim().is_empty()),
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(location) => f.write_str(location),
            Self::Multi(locations) => f.write_str(&locations.join(", ")),
        }
    }
}

/// One physical or logical data origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub location: SourceLocation,
    pub refresh_method: RefreshMethod,
    #[serde(default)]
    pub frequency: UpdateFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<DataFormat>,
    /// Query parameters sent with polled requests.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Creation time of a static dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<UtcDateTime>,
}

impl DataSourceConfig {
    pub fn manual_file(path: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Manual,
            location: SourceLocation::Single(path.into()),
            refresh_method: RefreshMethod::FileWatch,
            frequency: UpdateFrequency::EventDriven,
            service_name: None,
            format: None,
            params: BTreeMap::new(),
            created_at: None,
        }
    }

    pub fn cli_api(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::CliApi,
            location: SourceLocation::Single(endpoint.into()),
            refresh_method: RefreshMethod::ApiPoll,
            frequency: UpdateFrequency::Scheduled,
            service_name: Some(service_name.into()),
            format: Some(DataFormat::Json),
            params: BTreeMap::new(),
            created_at: None,
        }
    }

    pub fn static_dataset(location: impl Into<String>, created_at: UtcDateTime) -> Self {
        Self {
            source_type: SourceType::Static,
            location: SourceLocation::Single(location.into()),
            refresh_method: RefreshMethod::Never,
            frequency: UpdateFrequency::Never,
            service_name: None,
            format: None,
            params: BTreeMap::new(),
            created_at: Some(created_at),
        }
    }

    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.location = SourceLocation::Multi(locations);
        self
    }

    pub fn with_refresh_method(mut self, refresh_method: RefreshMethod) -> Self {
        self.refresh_method = refresh_method;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Explicit format, else inferred from the first location's extension.
    pub fn format_for(&self, location: &str) -> DataFormat {
        if let Some(format) = self.format {
            return format;
        }

        let is_csv = Path::new(location)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            DataFormat::Csv
        } else {
            DataFormat::Json
        }
    }

    fn validate(&self, chart_type: &ChartType) -> Result<(), ConfigError> {
        if self.location.is_empty() {
            return Err(ConfigError::EmptyLocation {
                chart_type: chart_type.to_string(),
            });
        }

        let needs_service = self.source_type == SourceType::CliApi;
        let has_service = self
            .service_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        if needs_service && !has_service {
            return Err(ConfigError::MissingServiceName {
                chart_type: chart_type.to_string(),
            });
        }

        Ok(())
    }
}

/// Staleness thresholds for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFreshnessConfig {
    pub warning_threshold_hours: f64,
    pub error_threshold_hours: f64,
    #[serde(default)]
    pub block_on_stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_grace_period_hours: Option<f64>,
}

impl DataFreshnessConfig {
    pub fn new(warning_threshold_hours: f64, error_threshold_hours: f64) -> Self {
        Self {
            warning_threshold_hours,
            error_threshold_hours,
            block_on_stale: false,
            manual_grace_period_hours: None,
        }
    }

    pub fn with_grace_period(mut self, hours: f64) -> Self {
        self.manual_grace_period_hours = Some(hours);
        self
    }

    pub fn blocking(mut self) -> Self {
        self.block_on_stale = true;
        self
    }

    pub fn grace_hours(&self) -> f64 {
        self.manual_grace_period_hours.unwrap_or(0.0)
    }

    fn validate(&self, chart_type: &ChartType) -> Result<(), ConfigError> {
        let fields = [
            ("warningThresholdHours", Some(self.warning_threshold_hours)),
            ("errorThresholdHours", Some(self.error_threshold_hours)),
            ("manualGracePeriodHours", self.manual_grace_period_hours),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidThreshold {
                        chart_type: chart_type.to_string(),
                        field,
                    });
                }
            }
        }

        if self.warning_threshold_hours >= self.error_threshold_hours {
            return Err(ConfigError::InconsistentThresholds {
                chart_type: chart_type.to_string(),
                warning: self.warning_threshold_hours,
                error: self.error_threshold_hours,
            });
        }

        Ok(())
    }
}

/// Whether, how and how often a dependency may be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshPolicy {
    pub auto_refresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,
    pub allow_manual_refresh: bool,
    pub refresh_on_visible: bool,
    pub max_retries: u32,
    pub retry_backoff: Backoff,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            auto_refresh: false,
            refresh_interval_ms: None,
            allow_manual_refresh: true,
            refresh_on_visible: false,
            max_retries: 2,
            retry_backoff: Backoff::Exponential,
        }
    }
}

impl RefreshPolicy {
    pub fn auto(interval_ms: u64) -> Self {
        Self {
            auto_refresh: true,
            refresh_interval_ms: Some(interval_ms),
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Interval of the recurring refresh, when auto refresh is on.
    pub fn auto_interval_ms(&self) -> Option<u64> {
        if self.auto_refresh {
            self.refresh_interval_ms.filter(|ms| *ms > 0)
        } else {
            None
        }
    }
}

/// Checks applied to fetched records before they are cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rows: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_validator: Option<String>,
}

/// Configuration bound to one visual element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataDependency {
    pub chart_type: ChartType,
    pub primary_source: DataSourceConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_sources: Vec<DataSourceConfig>,
    pub freshness: DataFreshnessConfig,
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
}

impl ChartDataDependency {
    pub fn new(
        chart_type: ChartType,
        primary_source: DataSourceConfig,
        freshness: DataFreshnessConfig,
    ) -> Self {
        Self {
            chart_type,
            primary_source,
            fallback_sources: Vec::new(),
            freshness,
            refresh_policy: RefreshPolicy::default(),
            dependencies: Vec::new(),
            validation: None,
        }
    }

    pub fn with_fallback(mut self, source: DataSourceConfig) -> Self {
        self.fallback_sources.push(source);
        self
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    pub fn with_validation(mut self, rules: ValidationRules) -> Self {
        self.validation = Some(rules);
        self
    }

    pub fn depends_on(mut self, chart_type: ChartType) -> Self {
        self.dependencies.push(chart_type);
        self
    }

    /// Primary source followed by fallbacks, in trial order.
    pub fn sources(&self) -> impl Iterator<Item = &DataSourceConfig> {
        std::iter::once(&self.primary_source).chain(self.fallback_sources.iter())
    }

    pub fn is_static(&self) -> bool {
        self.primary_source.source_type == SourceType::Static
    }

    /// Refresh method the engine actually honours for the primary source.
    pub fn effective_refresh_method(&self) -> RefreshMethod {
        if self.is_static() {
            RefreshMethod::Never
        } else {
            self.primary_source.refresh_method
        }
    }

    /// Per-entry validation; cross-entry checks (duplicates, cycles) run in
    /// the registry loader.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.freshness.validate(&self.chart_type)?;

        // Static entries get auto refresh switched off by the override.
        let policy = &self.refresh_policy;
        if !self.is_static()
            && policy.auto_refresh
            && policy.refresh_interval_ms.unwrap_or(0) == 0
        {
            return Err(ConfigError::MissingRefreshInterval {
                chart_type: self.chart_type.to_string(),
            });
        }

        for source in self.sources() {
            source.validate(&self.chart_type)?;
        }

        Ok(())
    }

    /// Forces static sources to `never` refresh. Returns the conflicting
    /// settings that were overridden, empty when nothing changed.
    pub(crate) fn apply_static_override(&mut self) -> Vec<&'static str> {
        let mut overridden = Vec::new();
        if !self.is_static() {
            return overridden;
        }

        if self.primary_source.refresh_method != RefreshMethod::Never {
            self.primary_source.refresh_method = RefreshMethod::Never;
            overridden.push("refreshMethod");
        }
        if self.refresh_policy.auto_refresh {
            self.refresh_policy.auto_refresh = false;
            overridden.push("autoRefresh");
        }
        if self.refresh_policy.refresh_on_visible {
            self.refresh_policy.refresh_on_visible = false;
            overridden.push("refreshOnVisible");
        }
        for fallback in &mut self.fallback_sources {
            if fallback.source_type == SourceType::Static
                && fallback.refresh_method != RefreshMethod::Never
            {
                fallback.refresh_method = RefreshMethod::Never;
                overridden.push("fallbackSources.refreshMethod");
            }
        }

        overridden
    }
}
