//! Classification of modern endpoint replies into [`Response`] values.

use dsq_types::{CallFormat, DataSourceError, RemoteErrorEntry, Response, ResponseWarning, Row};
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use tracing::warn;

/// Interprets decoded reply payloads for one identifier and call format.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    identifier: String,
    call_format: CallFormat,
}

impl ResponseClassifier {
    pub fn new(identifier: impl Into<String>, call_format: CallFormat) -> Self {
        Self {
            identifier: identifier.into(),
            call_format,
        }
    }

    /// Classifies `payload`.
    ///
    /// A non-empty `errors` collection always yields
    /// [`DataSourceError::RemoteValidation`], whatever else the payload holds.
    /// Payloads lacking the keys the call format requires yield
    /// [`DataSourceError::ResponseShape`].
    pub fn classify(&self, payload: Value, status: Option<u16>) -> Result<Response, DataSourceError> {
        let errors = remote_errors(&payload);
        if !errors.is_empty() {
            return Err(DataSourceError::RemoteValidation {
                identifier: self.identifier.clone(),
                status: status.unwrap_or(200),
                errors,
            });
        }

        let Value::Object(map) = &payload else {
            return Err(self.shape_error(format!("expected a JSON object, got {}", kind_of(&payload))));
        };

        let rows = match self.call_format {
            CallFormat::Tabular => self.tabular_rows(map)?,
            CallFormat::RowList => self.listed_rows(map)?,
        };

        let outputs: IndexMap<String, Value> = match map.get("outputs") {
            Some(Value::Object(outputs)) => outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => IndexMap::new(),
        };
        let transaction_no = map.get("transactionNo").and_then(|value| match value {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        });
        let row_limit_exceeded = map.get("rowLimitExceeded").is_some_and(is_truthy);

        let mut response = Response::new(self.identifier.clone(), payload.clone(), rows)
            .with_outputs(outputs)
            .with_transaction_no(transaction_no)
            .with_status_code(status);
        if row_limit_exceeded {
            warn!(
                identifier = %self.identifier,
                "row limit exceeded; review input filters to limit returned data"
            );
            response = response.with_warning(ResponseWarning::RowLimitExceeded);
        }
        Ok(response)
    }

    fn tabular_rows(&self, map: &JsonMap<String, Value>) -> Result<Vec<Row>, DataSourceError> {
        let tables = match map.get("tables") {
            Some(Value::Array(tables)) => tables,
            Some(other) => return Err(self.shape_error(format!("`tables` must be an array, got {}", kind_of(other)))),
            None => return Err(self.shape_error("missing `tables`")),
        };
        let Some(first) = tables.first() else {
            // An empty table list means the payload itself is the only row.
            return Ok(vec![map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()]);
        };

        let columns: Vec<String> = match first.get("columns") {
            Some(Value::Array(columns)) => columns
                .iter()
                .map(|column| match column {
                    Value::String(name) => name.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => return Err(self.shape_error("first table has no `columns` array")),
        };
        let Some(Value::Array(rows)) = first.get("rows") else {
            return Err(self.shape_error("first table has no `rows` array"));
        };

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let Value::Array(values) = row else {
                    return Err(self.shape_error(format!("table row {index} is not an array")));
                };
                if values.len() != columns.len() {
                    return Err(self.shape_error(format!(
                        "table row {index} has {} values for {} columns",
                        values.len(),
                        columns.len()
                    )));
                }
                Ok(columns.iter().cloned().zip(values.iter().cloned()).collect())
            })
            .collect()
    }

    fn listed_rows(&self, map: &JsonMap<String, Value>) -> Result<Vec<Row>, DataSourceError> {
        let Some(Value::Array(rows)) = map.get("rows") else {
            return Err(self.shape_error("missing `rows` array"));
        };
        rows.iter()
            .enumerate()
            .map(|(index, row)| match row {
                Value::Object(fields) => Ok(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                other => Err(self.shape_error(format!("row {index} is {}, expected an object", kind_of(other)))),
            })
            .collect()
    }

    fn shape_error(&self, message: impl Into<String>) -> DataSourceError {
        DataSourceError::response_shape(self.identifier.clone(), message)
    }
}

fn remote_errors(payload: &Value) -> Vec<RemoteErrorEntry> {
    match payload.get("errors") {
        Some(Value::Array(entries)) => entries.iter().cloned().map(RemoteErrorEntry).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) if is_truthy(single) => vec![RemoteErrorEntry(single.clone())],
        Some(_) => Vec::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tabular() -> ResponseClassifier {
        ResponseClassifier::new("8566", CallFormat::Tabular)
    }

    #[test]
    fn zips_columns_with_table_rows() {
        let payload = json!({"tables": [{"columns": ["X", "Y"], "rows": [[1, 2], [3, 4]]}], "transactionNo": "77"});
        let response = tabular().classify(payload, Some(200)).unwrap();
        let rows: Vec<Value> = response
            .rows()
            .iter()
            .map(|row| serde_json::to_value(row).unwrap())
            .collect();
        assert_eq!(rows, vec![json!({"X": 1, "Y": 2}), json!({"X": 3, "Y": 4})]);
        assert_eq!(response.transaction_no(), Some("77"));
        assert_eq!(response.status_code(), Some(200));
    }

    #[test]
    fn empty_tables_yield_the_payload_as_one_row() {
        let payload = json!({"tables": [], "transactionNo": 5});
        let response = tabular().classify(payload, None).unwrap();
        assert_eq!(response.rows().len(), 1);
        assert_eq!(response.rows()[0].get("transactionNo"), Some(&json!(5)));
        assert_eq!(response.transaction_no(), Some("5"));
    }

    #[test]
    fn row_list_takes_rows_directly() {
        let classifier = ResponseClassifier::new("9001", CallFormat::RowList);
        let payload = json!({"rows": [{"Part_No": "A-1"}, {"Part_No": "B-2"}], "outputs": {"Result_Code": 0}});
        let response = classifier.classify(payload, Some(200)).unwrap();
        assert_eq!(response.column("Part_No"), vec![&json!("A-1"), &json!("B-2")]);
        assert_eq!(response.get("Result_Code"), Some(&json!(0)));
        assert!(response.warnings().is_empty());
    }

    #[test]
    fn errors_win_over_rows() {
        let payload = json!({
            "errors": [{"message": "Part_No is required"}],
            "tables": [{"columns": ["X"], "rows": [[1]]}],
            "rows": [{"X": 1}],
        });
        for format in CallFormat::ALL {
            let error = ResponseClassifier::new("8566", format)
                .classify(payload.clone(), Some(200))
                .unwrap_err();
            match error {
                DataSourceError::RemoteValidation { status, errors, .. } => {
                    assert_eq!(status, 200);
                    assert_eq!(errors[0].message(), "Part_No is required");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn row_limit_is_a_warning() {
        let classifier = ResponseClassifier::new("9001", CallFormat::RowList);
        let payload = json!({"rows": [{"A": 1}], "rowLimitExceeded": true});
        let response = classifier.classify(payload, None).unwrap();
        assert_eq!(response.warnings(), &[ResponseWarning::RowLimitExceeded]);
        assert_eq!(response.rows().len(), 1);
    }

    #[test]
    fn missing_keys_are_shape_errors() {
        let cases = [
            (CallFormat::Tabular, json!({"rows": []})),
            (CallFormat::Tabular, json!({"tables": [{"columns": ["X"]}]})),
            (CallFormat::Tabular, json!({"tables": [{"columns": ["X", "Y"], "rows": [[1]]}]})),
            (CallFormat::RowList, json!({"tables": []})),
            (CallFormat::RowList, json!({"rows": [1, 2]})),
            (CallFormat::RowList, json!([1, 2])),
        ];
        for (format, payload) in cases {
            let error = ResponseClassifier::new("1", format).classify(payload.clone(), None).unwrap_err();
            assert!(matches!(error, DataSourceError::ResponseShape { .. }), "payload {payload}");
        }
    }
}
