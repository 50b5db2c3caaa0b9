//! Source adapters, one per source type.
//!
//! | Adapter | Source types | Backing |
//! |---------|--------------|---------|
//! | [`FileWatchAdapter`] | `manual`, `hybrid` (file side) | filesystem + `notify` |
//! | [`PollingServiceAdapter`] | `cli-api`, `hybrid` (service side) | [`ServiceClient`](crate::ServiceClient) |
//! | [`StaticAdapter`] | `static` | none |
//!
//! [`AdapterSet`] resolves the adapter responsible for a given source.

mod file_watch;
mod polling;
mod static_source;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;

pub use file_watch::{FileChangeEvent, FileWatchAdapter};
pub use polling::PollingServiceAdapter;
pub use static_source::StaticAdapter;

use crate::data_source::{Record, SourceAdapter};
use crate::{DataSourceConfig, RefreshMethod, SourceType};

/// Adapter lookup by source type.
///
/// Cloning shares the adapter instances.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.insert(source_type, adapter);
        self
    }

    pub fn insert(&mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(source_type, adapter);
    }

    pub fn contains(&self, source_type: SourceType) -> bool {
        self.adapters.contains_key(&source_type)
    }

    /// Adapter serving `source`.
    ///
    /// An explicitly registered `hybrid` adapter wins. Otherwise hybrid
    /// sources that poll a named service go to the `cli-api` adapter and
    /// the rest to the `manual` file adapter.
    pub fn resolve(&self, source: &DataSourceConfig) -> Option<Arc<dyn SourceAdapter>> {
        if let Some(adapter) = self.adapters.get(&source.source_type) {
            return Some(Arc::clone(adapter));
        }
        if source.source_type != SourceType::Hybrid {
            return None;
        }

        let delegate = if is_file_backed(source) {
            SourceType::Manual
        } else {
            SourceType::CliApi
        };
        self.adapters.get(&delegate).map(Arc::clone)
    }
}

/// True for sources read from the local filesystem: `manual` sources and
/// `hybrid` sources that do not poll a named service.
pub fn is_file_backed(source: &DataSourceConfig) -> bool {
    match source.source_type {
        SourceType::Manual => true,
        SourceType::Hybrid => {
            let polls_service = source.service_name.is_some()
                && matches!(
                    source.refresh_method,
                    RefreshMethod::ApiPoll | RefreshMethod::HybridSync
                );
            !polls_service
        }
        SourceType::CliApi | SourceType::Static => false,
    }
}

impl Debug for AdapterSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut adapters = self
            .adapters
            .iter()
            .map(|(source_type, adapter)| (source_type.as_str(), adapter.name()))
            .collect::<Vec<_>>();
        adapters.sort_unstable();
        f.debug_struct("AdapterSet").field("adapters", &adapters).finish()
    }
}

/// Rows of a JSON payload: an array of objects, an object wrapping one
/// under `records` or `data`, or a single object.
pub(crate) fn records_from_json(value: Value) -> Result<Vec<Record>, String> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut object) => {
            match object.remove("records").or_else(|| object.remove("data")) {
                Some(Value::Array(rows)) => rows,
                Some(other) => {
                    return Err(format!(
                        "expected an array of records, found {}",
                        json_kind(&other)
                    ))
                }
                None => return Ok(vec![object]),
            }
        }
        other => return Err(format!("expected records, found {}", json_kind(&other))),
    };

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Object(record) => Ok(record),
            other => Err(format!("row {index} is {}, not an object", json_kind(&other))),
        })
        .collect()
}

/// Rows of a CSV payload with a header line.
///
/// Quoted fields may contain commas, line breaks and `""` escapes and are
/// always kept as strings; bare numeric or boolean cells are typed.
pub(crate) fn records_from_csv(content: &str) -> Result<Vec<Record>, String> {
    let mut rows = csv_rows(content)?.into_iter();

    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let columns = header
        .into_iter()
        .map(|field| field.text.trim().to_owned())
        .collect::<Vec<_>>();
    if let Some(index) = columns.iter().position(|column| column.is_empty()) {
        return Err(format!("header column {index} is empty"));
    }

    rows.enumerate()
        .map(|(index, cells)| {
            if cells.len() != columns.len() {
                return Err(format!(
                    "row {index} has {} fields, header has {}",
                    cells.len(),
                    columns.len()
                ));
            }
            Ok(columns
                .iter()
                .zip(cells)
                .map(|(column, cell)| (column.clone(), typed_cell(cell)))
                .collect::<Record>())
        })
        .collect()
}

#[derive(Debug, Default)]
struct CsvField {
    text: String,
    quoted: bool,
}

/// Splits a CSV payload into rows of fields, skipping blank lines.
fn csv_rows(content: &str) -> Result<Vec<Vec<CsvField>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = CsvField::default();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.text.push('"');
                }
                '"' => in_quotes = false,
                _ => field.text.push(ch),
            }
            continue;
        }

        match ch {
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            '"' if !field.quoted && field.text.trim().is_empty() => {
                field.text.clear();
                field.quoted = true;
                in_quotes = true;
            }
            // Padding after a closing quote.
            _ if field.quoted && ch.is_whitespace() => {}
            _ if field.quoted => {
                return Err(format!("unexpected {ch:?} after a quoted field"));
            }
            _ => field.text.push(ch),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_owned());
    }
    if field.quoted || !field.text.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    Ok(rows)
}

fn push_row(rows: &mut Vec<Vec<CsvField>>, row: Vec<CsvField>) {
    let blank = matches!(row.as_slice(), [only] if !only.quoted && only.text.trim().is_empty());
    if !blank {
        rows.push(row);
    }
}

fn typed_cell(cell: CsvField) -> Value {
    if cell.quoted {
        return Value::String(cell.text);
    }
    let trimmed = cell.text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::from(integer);
    }
    if let Some(number) = trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(number);
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(trimmed.to_owned()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
