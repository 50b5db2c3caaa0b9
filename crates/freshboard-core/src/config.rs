//! Engine configuration document.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "settings": { "maxConcurrentRefresh": 3, "enableFileWatching": true },
//!   "services": [{ "serviceName": "billing", "quotaLimit": 30, "requiresAuth": true }],
//!   "dependencies": [{ "chartType": "usage-trend", "...": "..." }]
//! }
//! ```
//!
//! Dependency entries are decoded one by one: a malformed entry is reported
//! in [`EngineConfig::rejected`] and never replaced by defaults, while the
//! remaining entries still load.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service_policy::ServicePolicy;
use crate::{ChartDataDependency, ConfigError, CoreError};

pub const DEFAULT_CONFIG_VERSION: &str = "1.0";

/// Registry-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// TTL of cached records.
    pub default_cache_duration_ms: u64,
    pub enable_file_watching: bool,
    /// Allows the engine to build a network-backed polling adapter when the
    /// host did not inject a service client.
    #[serde(rename = "enableCLIDiscovery")]
    pub enable_cli_discovery: bool,
    pub max_concurrent_refresh: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_cache_duration_ms: 300_000,
            enable_file_watching: true,
            enable_cli_discovery: false,
            max_concurrent_refresh: 3,
        }
    }
}

impl RegistrySettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_refresh == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }

    pub fn with_max_concurrent_refresh(mut self, limit: usize) -> Self {
        self.max_concurrent_refresh = limit;
        self
    }

    pub fn with_file_watching(mut self, enabled: bool) -> Self {
        self.enable_file_watching = enabled;
        self
    }
}

/// Parsed configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub version: String,
    pub settings: RegistrySettings,
    pub services: Vec<ServicePolicy>,
    pub dependencies: Vec<ChartDataDependency>,
    /// Entries that could not be decoded.
    pub rejected: Vec<ConfigError>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    settings: RegistrySettings,
    #[serde(default)]
    services: Vec<ServicePolicy>,
    #[serde(default)]
    dependencies: Vec<Value>,
}

fn default_version() -> String {
    String::from(DEFAULT_CONFIG_VERSION)
}

impl EngineConfig {
    pub fn new(dependencies: Vec<ChartDataDependency>) -> Self {
        Self {
            version: default_version(),
            settings: RegistrySettings::default(),
            services: Vec::new(),
            dependencies,
            rejected: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_service(mut self, policy: ServicePolicy) -> Self {
        self.services.push(policy);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Fails when the document itself is not valid JSON of the expected
    /// shape, or when settings are invalid. Bad dependency entries do not
    /// fail the parse; they land in [`EngineConfig::rejected`].
    pub fn from_json_str(input: &str) -> Result<Self, CoreError> {
        let raw: RawConfig = serde_json::from_str(input)?;
        raw.settings.validate()?;

        let mut dependencies = Vec::with_capacity(raw.dependencies.len());
        let mut rejected = Vec::new();
        for (index, entry) in raw.dependencies.into_iter().enumerate() {
            let chart_type = entry
                .get("chartType")
                .and_then(Value::as_str)
                .map(str::to_owned);
            match serde_json::from_value::<ChartDataDependency>(entry) {
                Ok(dependency) => dependencies.push(dependency),
                Err(error) => {
                    let message = match chart_type {
                        Some(chart_type) => format!("chart '{chart_type}': {error}"),
                        None => error.to_string(),
                    };
                    tracing::warn!(
                        event = "core.config.entry_malformed",
                        index,
                        error = %message
                    );
                    rejected.push(ConfigError::MalformedEntry { index, message });
                }
            }
        }

        Ok(Self {
            version: raw.version,
            settings: raw.settings,
            services: raw.services,
            dependencies,
            rejected,
        })
    }

    /// Reads and parses a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}
