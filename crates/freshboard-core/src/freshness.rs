//! Pure staleness evaluation.
//!
//! [`evaluate`] maps a dependency's thresholds and last-update time onto a
//! [`StatusKind`]. It performs no I/O and reads no clock; callers pass `now`.

use serde::{Deserialize, Serialize};

use crate::{DataFreshnessConfig, SourceType, StatusKind, UtcDateTime};

/// Output of a freshness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessVerdict {
    pub status: StatusKind,
    pub age_hours: f64,
}

/// Effective `(warning, error)` thresholds in hours for a source type.
///
/// Manual sources get the grace period added to both thresholds since their
/// update timing is not under anyone's schedule.
pub fn effective_thresholds(config: &DataFreshnessConfig, source_type: SourceType) -> (f64, f64) {
    let grace = match source_type {
        SourceType::Manual => config.grace_hours(),
        SourceType::CliApi | SourceType::Static | SourceType::Hybrid => 0.0,
    };

    (
        config.warning_threshold_hours + grace,
        config.error_threshold_hours + grace,
    )
}

/// Computes the status for data last updated at `last_updated_at`.
///
/// Static datasets never age: they evaluate `available` whenever a timestamp
/// is known.
pub fn evaluate(
    config: &DataFreshnessConfig,
    source_type: SourceType,
    last_updated_at: Option<UtcDateTime>,
    now: UtcDateTime,
) -> FreshnessVerdict {
    let Some(last_updated_at) = last_updated_at else {
        return FreshnessVerdict {
            status: StatusKind::Missing,
            age_hours: 0.0,
        };
    };

    let age_hours = last_updated_at.age_hours(now);
    if source_type == SourceType::Static {
        return FreshnessVerdict {
            status: StatusKind::Available,
            age_hours,
        };
    }

    let (warning, error) = effective_thresholds(config, source_type);
    let status = if age_hours <= warning {
        StatusKind::Available
    } else if age_hours <= error {
        StatusKind::Stale
    } else {
        StatusKind::Error
    };

    FreshnessVerdict { status, age_hours }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-06-01T12:00:00Z").expect("timestamp")
    }

    #[test]
    fn missing_timestamp_is_missing() {
        let verdict = evaluate(&DataFreshnessConfig::new(4.0, 24.0), SourceType::CliApi, None, now());
        assert_eq!(verdict.status, StatusKind::Missing);
    }

    #[test]
    fn threshold_boundaries_are_inclusive() {
        let config = DataFreshnessConfig::new(4.0, 24.0);
        let at = |hours: f64| {
            evaluate(&config, SourceType::CliApi, Some(now().minus_hours(hours)), now()).status
        };

        assert_eq!(at(0.0), StatusKind::Available);
        assert_eq!(at(4.0), StatusKind::Available);
        assert_eq!(at(4.5), StatusKind::Stale);
        assert_eq!(at(24.0), StatusKind::Stale);
        assert_eq!(at(24.5), StatusKind::Error);
    }

    #[test]
    fn grace_period_applies_only_to_manual_sources() {
        let config = DataFreshnessConfig::new(4.0, 24.0).with_grace_period(8.0);
        let last = Some(now().minus_hours(10.0));

        assert_eq!(
            evaluate(&config, SourceType::Manual, last, now()).status,
            StatusKind::Available
        );
        assert_eq!(
            evaluate(&config, SourceType::CliApi, last, now()).status,
            StatusKind::Stale
        );
    }

    #[test]
    fn static_sources_never_age() {
        let config = DataFreshnessConfig::new(1.0, 2.0);
        let verdict = evaluate(&config, SourceType::Static, Some(now().minus_hours(10_000.0)), now());
        assert_eq!(verdict.status, StatusKind::Available);
        assert!(verdict.age_hours > 9_999.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let config = DataFreshnessConfig::new(2.0, 6.0).with_grace_period(1.0);
        let last = Some(now().minus_hours(5.25));

        let first = evaluate(&config, SourceType::Manual, last, now());
        let second = evaluate(&config, SourceType::Manual, last, now());
        assert_eq!(first, second);
    }

    #[test]
    fn status_never_improves_with_age() {
        let config = DataFreshnessConfig::new(3.0, 9.0).with_grace_period(2.0);
        for source_type in [SourceType::Manual, SourceType::CliApi, SourceType::Hybrid] {
            let mut previous = 0;
            for step in 0..200 {
                let hours = f64::from(step) * 0.1;
                let verdict =
                    evaluate(&config, source_type, Some(now().minus_hours(hours)), now());
                let severity = verdict.status.severity().expect("on degradation axis");
                assert!(severity >= previous, "{source_type} regressed at {hours}h");
                previous = severity;
            }
        }
    }
}
