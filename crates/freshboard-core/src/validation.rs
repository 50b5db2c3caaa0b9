//! Record validation applied by adapters before data is accepted.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::data_source::{Record, SourceError};
use crate::ValidationRules;

/// Named validator referenced from `validation.customValidator`.
pub type CustomValidator = Arc<dyn Fn(&[Record]) -> Result<(), String> + Send + Sync>;

/// Registry of named custom validators.
#[derive(Clone, Default)]
pub struct ValidatorSet {
    validators: HashMap<String, CustomValidator>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, validator: F)
    where
        F: Fn(&[Record]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(validator));
    }

    pub fn get(&self, name: &str) -> Option<&CustomValidator> {
        self.validators.get(name)
    }
}

impl Debug for ValidatorSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names = self.validators.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ValidatorSet").field("validators", &names).finish()
    }
}

/// Checks `records` against `rules`. Failures are permanent
/// [`SourceError::validation`] errors; data is never coerced into shape.
pub fn validate_records(
    rules: Option<&ValidationRules>,
    records: &[Record],
    validators: &ValidatorSet,
) -> Result<(), SourceError> {
    let Some(rules) = rules else {
        return Ok(());
    };

    if let Some(min_rows) = rules.min_rows {
        if records.len() < min_rows {
            return Err(SourceError::validation(format!(
                "expected at least {min_rows} rows, found {}",
                records.len()
            )));
        }
    }

    for column in &rules.required_columns {
        if let Some(index) = records.iter().position(|record| !record.contains_key(column)) {
            return Err(SourceError::validation(format!(
                "row {index} is missing required column '{column}'"
            )));
        }
    }

    if let Some(name) = rules.custom_validator.as_deref() {
        let validator = validators.get(name).ok_or_else(|| {
            SourceError::validation(format!("custom validator '{name}' is not registered"))
        })?;
        validator(records)
            .map_err(|message| SourceError::validation(format!("{name}: {message}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use serde_json::json;

    fn rows(values: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(values).expect("records")
    }

    #[test]
    fn no_rules_accepts_anything() {
        assert!(validate_records(None, &[], &ValidatorSet::new()).is_ok());
    }

    #[test]
    fn enforces_min_rows() {
        let rules = ValidationRules {
            min_rows: Some(2),
            ..ValidationRules::default()
        };
        let records = rows(json!([{ "day": "mon" }]));

        let err = validate_records(Some(&rules), &records, &ValidatorSet::new())
            .expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Validation);
        assert!(!err.retryable());
    }

    #[test]
    fn reports_first_row_missing_column() {
        let rules = ValidationRules {
            required_columns: vec![String::from("cost")],
            ..ValidationRules::default()
        };
        let records = rows(json!([{ "cost": 1 }, { "tokens": 5 }]));

        let err = validate_records(Some(&rules), &records, &ValidatorSet::new())
            .expect_err("must fail");
        assert!(err.message().contains("row 1"));
        assert!(err.message().contains("cost"));
    }

    #[test]
    fn runs_named_custom_validator() {
        let mut validators = ValidatorSet::new();
        validators.register("non_negative_cost", |records: &[Record]| {
            let negative = records
                .iter()
                .any(|r| r.get("cost").and_then(|v| v.as_f64()).is_some_and(|c| c < 0.0));
            if negative {
                Err(String::from("cost must be non-negative"))
            } else {
                Ok(())
            }
        });
        let rules = ValidationRules {
            custom_validator: Some(String::from("non_negative_cost")),
            ..ValidationRules::default()
        };

        assert!(validate_records(Some(&rules), &rows(json!([{ "cost": 2.5 }])), &validators).is_ok());
        let err = validate_records(Some(&rules), &rows(json!([{ "cost": -1 }])), &validators)
            .expect_err("must fail");
        assert!(err.message().starts_with("non_negative_cost:"));
    }

    #[test]
    fn unknown_custom_validator_is_a_validation_failure() {
        let rules = ValidationRules {
            custom_validator: Some(String::from("missing")),
            ..ValidationRules::default()
        };

        let err = validate_records(Some(&rules), &[], &ValidatorSet::new()).expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::Validation);
    }
}
