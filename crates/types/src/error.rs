//! Error taxonomy for data source calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::FieldType;

/// Every failure a caller can observe from the engine, transport or adapters.
///
/// Variants carry structured context so callers can branch or log without
/// parsing the rendered message.
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// Invalid call format, missing tenant credential, malformed retry
    /// configuration or endpoint. Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Network failure, or a retryable status that persisted through every attempt.
    #[error("Transport error after {attempts} attempt(s): {message}")]
    Transport {
        message: String,
        status: Option<u16>,
        body: Option<String>,
        attempts: u32,
    },

    /// The modern endpoint answered with a non-empty `errors` collection.
    #[error("Data source {identifier} rejected the call (status {status}): {}", summarize_entries(.errors))]
    RemoteValidation {
        identifier: String,
        status: u16,
        errors: Vec<RemoteErrorEntry>,
    },

    /// The legacy endpoint answered with its `Error` flag set.
    #[error(
        "Legacy data source {data_source_key} failed: {message} (instance {instance_no}, status {status_no}, error {error_no})"
    )]
    RemoteConnection {
        message: String,
        data_source_key: String,
        instance_no: String,
        status_no: String,
        error_no: String,
    },

    /// The reply decoded but lacks the keys its call format requires.
    #[error("Unexpected response shape from data source {identifier}: {message}")]
    ResponseShape { identifier: String, message: String },

    /// A field value could not be coerced to its registered type.
    #[error("Field '{field}' cannot be coerced to {expected}: {value}")]
    InvalidFieldValue {
        field: String,
        expected: FieldType,
        value: Value,
    },

    /// A REST API answered with a non-success status. `body` is the decoded
    /// error document, or the raw text when it is not JSON.
    #[error("API call to {url} failed with status {status}: {}", api_error_summary(.body))]
    Api { url: String, status: u16, body: Value },

    /// A legacy parameter name or value contains the delimiter and would
    /// shift every following parameter.
    #[error("Field '{field}' contains the legacy delimiter '{delimiter}'")]
    LegacyEncoding { field: String, delimiter: String },
}

impl DataSourceError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn transport(message: impl Into<String>, status: Option<u16>, body: Option<String>, attempts: u32) -> Self {
        Self::Transport {
            message: message.into(),
            status,
            body,
            attempts,
        }
    }

    pub fn response_shape(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResponseShape {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// HTTP status associated with the failure, when one was observed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            Self::RemoteValidation { status, .. } => Some(*status),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One entry of a remote `errors` collection, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteErrorEntry(pub Value);

impl RemoteErrorEntry {
    /// Best-effort human readable message for the entry.
    pub fn message(&self) -> String {
        for key in ["message", "Message", "description", "error"] {
            if let Some(Value::String(text)) = self.0.get(key) {
                return text.clone();
            }
        }
        match &self.0 {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn api_error_summary(body: &Value) -> String {
    match body {
        Value::Null => "no details".to_string(),
        Value::Array(entries) => summarize_entries(&entries.iter().cloned().map(RemoteErrorEntry).collect::<Vec<_>>()),
        other => RemoteErrorEntry(other.clone()).message(),
    }
}

fn summarize_entries(entries: &[RemoteErrorEntry]) -> String {
    entries.iter().map(RemoteErrorEntry::message).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_validation_message_lists_entries() {
        let error = DataSourceError::RemoteValidation {
            identifier: "2360".into(),
            status: 400,
            errors: vec![
                RemoteErrorEntry(json!({"message": "Part_Key is required"})),
                RemoteErrorEntry(json!("bad date")),
            ],
        };
        let rendered = error.to_string();
        assert!(rendered.contains("2360"));
        assert!(rendered.contains("Part_Key is required; bad date"));
        assert_eq!(error.status_code(), Some(400));
    }

    #[test]
    fn entry_message_falls_back_to_json_text() {
        let entry = RemoteErrorEntry(json!({"code": 7}));
        assert_eq!(entry.message(), r#"{"code":7}"#);
    }

    #[test]
    fn api_error_carries_status_and_message() {
        let error = DataSourceError::Api {
            url: "https://connect.plex.com/mdm/v1/customers".into(),
            status: 404,
            body: json!({"code": "NOT_FOUND", "message": "Customer not found"}),
        };
        assert!(error.to_string().contains("status 404: Customer not found"));
        assert_eq!(error.status_code(), Some(404));
    }
}
