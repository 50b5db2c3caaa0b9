use thiserror::Error;

/// Field-level validation errors for identifiers and timestamps.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("chart type cannot be empty")]
    EmptyChartType,
    #[error("chart type length {len} exceeds max {max}")]
    ChartTypeTooLong { len: usize, max: usize },
    #[error("chart type must start with an ASCII letter: '{ch}'")]
    ChartTypeInvalidStart { ch: char },
    #[error("chart type contains invalid character '{ch}' at index {index}")]
    ChartTypeInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Load-time configuration errors. Each one rejects a single dependency entry;
/// the rest of the registry stays usable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("chart '{chart_type}': warning threshold {warning}h must be below error threshold {error}h")]
    InconsistentThresholds {
        chart_type: String,
        warning: f64,
        error: f64,
    },

    #[error("chart '{chart_type}': field '{field}' must be a finite, non-negative number")]
    InvalidThreshold {
        chart_type: String,
        field: &'static str,
    },

    #[error("chart '{chart_type}': autoRefresh requires a positive refreshIntervalMs")]
    MissingRefreshInterval { chart_type: String },

    #[error("chart '{chart_type}': source location must name at least one path or endpoint")]
    EmptyLocation { chart_type: String },

    #[error("chart '{chart_type}': cli-api source requires a serviceName")]
    MissingServiceName { chart_type: String },

    #[error("chart '{chart_type}' is configured more than once")]
    DuplicateChartType { chart_type: String },

    #[error("chart '{chart_type}' depends on unknown chart '{dependency}'")]
    UnknownDependency {
        chart_type: String,
        dependency: String,
    },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("malformed dependency entry #{index}: {message}")]
    MalformedEntry { index: usize, message: String },

    #[error("settings: maxConcurrentRefresh must be at least 1")]
    InvalidConcurrency,
}

impl ConfigError {
    /// Chart type the error is attributed to, when there is exactly one.
    pub fn chart_type(&self) -> Option<&str> {
        match self {
            Self::InconsistentThresholds { chart_type, .. }
            | Self::InvalidThreshold { chart_type, .. }
            | Self::MissingRefreshInterval { chart_type }
            | Self::EmptyLocation { chart_type }
            | Self::MissingServiceName { chart_type }
            | Self::DuplicateChartType { chart_type }
            | Self::UnknownDependency { chart_type, .. } => Some(chart_type),
            Self::Validation(_)
            | Self::CyclicDependency { .. }
            | Self::MalformedEntry { .. }
            | Self::InvalidConcurrency => None,
        }
    }
}

/// Top-level error type for engine construction and config loading.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
