use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::Row;

/// Non-fatal condition attached to a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseWarning {
    /// The server truncated the result; narrow the input filters.
    RowLimitExceeded,
}

impl fmt::Display for ResponseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseWarning::RowLimitExceeded => {
                f.write_str("row limit was exceeded; review input filters to limit returned data")
            }
        }
    }
}

/// Normalized result of a completed call, identical in shape for both protocols.
///
/// Built once by the classifier or the legacy adapter and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    source_identifier: String,
    raw_payload: Value,
    rows: Vec<Row>,
    outputs: IndexMap<String, Value>,
    warnings: Vec<ResponseWarning>,
    transaction_no: Option<String>,
    status_code: Option<u16>,
    row_count: Option<u64>,
}

impl Response {
    pub fn new(source_identifier: impl Into<String>, raw_payload: Value, rows: Vec<Row>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            raw_payload,
            rows,
            outputs: IndexMap::new(),
            warnings: Vec::new(),
            transaction_no: None,
            status_code: None,
            row_count: None,
        }
    }

    pub fn with_outputs(mut self, outputs: IndexMap<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_warning(mut self, warning: ResponseWarning) -> Self {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
        self
    }

    pub fn with_transaction_no(mut self, transaction_no: Option<String>) -> Self {
        self.transaction_no = transaction_no;
        self
    }

    pub fn with_status_code(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_row_count(mut self, row_count: Option<u64>) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn source_identifier(&self) -> &str {
        &self.source_identifier
    }

    pub fn raw_payload(&self) -> &Value {
        &self.raw_payload
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Named results flattened out of the reply's `outputs` object.
    pub fn outputs(&self) -> &IndexMap<String, Value> {
        &self.outputs
    }

    /// Look up a flattened output by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// Values of one column across every row; rows lacking the column are skipped.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|row| row.get(name)).collect()
    }

    /// Values of `name` from the rows where every `(column, expected)` filter
    /// matches. Scalars match on their text, so `"830"` selects `830`.
    pub fn column_where(&self, name: &str, filters: &[(&str, Value)]) -> Vec<&Value> {
        self.rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(column, expected)| row.get(*column).is_some_and(|actual| loosely_equal(actual, expected)))
            })
            .filter_map(|row| row.get(name))
            .collect()
    }

    /// The value of `name` when exactly one filtered row carries it.
    pub fn single(&self, name: &str, filters: &[(&str, Value)]) -> Option<&Value> {
        match self.column_where(name, filters).as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn warnings(&self) -> &[ResponseWarning] {
        &self.warnings
    }

    pub fn transaction_no(&self) -> Option<&str> {
        self.transaction_no.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Row count reported by the server, when it reports one.
    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::String(text), Value::Number(number)) | (Value::Number(number), Value::String(text)) => {
            text.trim() == number.to_string()
        }
        (Value::String(text), Value::Bool(flag)) | (Value::Bool(flag), Value::String(text)) => {
            text.trim().eq_ignore_ascii_case(if *flag { "true" } else { "false" })
        }
        _ => false,
    }
}
