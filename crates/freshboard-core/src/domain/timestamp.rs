use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::ValidationError;

const SECONDS_PER_HOUR: f64 = 3_600.0;

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        if parsed.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            });
        }

        Ok(Self(parsed))
    }

    /// Converts filesystem times (mtime) into UTC.
    pub fn from_system_time(value: SystemTime) -> Self {
        Self(OffsetDateTime::from(value).to_offset(UtcOffset::UTC))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    /// Shifts the timestamp back by a fractional number of hours.
    pub fn minus_hours(self, hours: f64) -> Self {
        Self(self.0 - Duration::seconds_f64(hours * SECONDS_PER_HOUR))
    }

    pub fn plus_millis(self, millis: u64) -> Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        Self(self.0 + Duration::milliseconds(millis))
    }

    /// Hours elapsed between `self` and `now`. Future timestamps (clock skew
    /// between the file server and this host) count as zero.
    pub fn age_hours(self, now: UtcDateTime) -> f64 {
        let seconds = (now.0 - self.0).as_seconds_f64();
        (seconds / SECONDS_PER_HOUR).max(0.0)
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("<unformattable>"))
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_utc_timestamp() {
        let err = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn age_is_measured_in_fractional_hours() {
        let now = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
        let then = UtcDateTime::parse("2024-03-01T02:30:00Z").expect("timestamp");
        assert!((then.age_hours(now) - 9.5).abs() < f64::EPSILON);
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        let now = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
        let later = UtcDateTime::parse("2024-03-01T13:00:00Z").expect("timestamp");
        assert_eq!(later.age_hours(now), 0.0);
    }

    #[test]
    fn minus_hours_round_trips_with_age() {
        let now = UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp");
        assert!((now.minus_hours(10.0).age_hours(now) - 10.0).abs() < 1e-9);
    }
}
