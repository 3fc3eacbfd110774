//! Legacy protocol adapter.
//!
//! Encodes a [`QueryInput`] as the parallel names/values strings expected by
//! `ExecuteDataSourcePost`, posts it through a [`LegacyTransport`] and
//! flattens the structured reply into the same [`Response`] shape the modern
//! classifier produces.

use std::sync::Arc;

use async_trait::async_trait;
use dsq_api::soap::{self, LegacyCall, LegacyReply};
use dsq_api::{ClientSettings, HttpRequest, Transport};
use dsq_types::{Credential, DataSourceError, Response, RetryPolicy, Row};
use dsq_util::CredentialResolver;
use dsq_util::http::{status_error_message, truncate_response_preview};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use crate::query::QueryInput;
use crate::tenants::resolve_credential;

pub const DEFAULT_DELIMITER: &str = "|";

/// Parallel names and values strings for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEncoding {
    pub names: String,
    pub values: String,
}

/// Encodes the query fields in insertion order.
///
/// Names and values are derived in a single pass over the fields so both
/// strings always have the same number of segments. A name or value that
/// contains `delimiter` fails with [`DataSourceError::LegacyEncoding`].
pub fn encode(query: &QueryInput, delimiter: &str) -> Result<LegacyEncoding, DataSourceError> {
    if delimiter.is_empty() {
        return Err(DataSourceError::configuration("legacy delimiter must not be empty"));
    }

    let mut names = Vec::with_capacity(query.fields().len());
    let mut values = Vec::with_capacity(query.fields().len());
    for (name, value) in query.fields() {
        let text = legacy_text(value);
        if name.contains(delimiter) || text.contains(delimiter) {
            return Err(DataSourceError::LegacyEncoding {
                field: name.clone(),
                delimiter: delimiter.to_string(),
            });
        }
        names.push(name.as_str());
        values.push(text);
    }

    Ok(LegacyEncoding {
        names: names.join(delimiter),
        values: values.join(delimiter),
    })
}

fn legacy_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Legacy data source keys are integers.
pub fn legacy_key(query: &QueryInput) -> Result<i64, DataSourceError> {
    query.identifier().trim().parse::<i64>().map_err(|_| {
        DataSourceError::configuration(format!(
            "legacy data source key must be an integer; received '{}'",
            query.identifier()
        ))
    })
}

/// Flattens a decoded reply, raising [`DataSourceError::RemoteConnection`]
/// when the reply's `Error` flag is set.
pub fn reply_to_response(data_source_key: &str, raw: String, reply: LegacyReply) -> Result<Response, DataSourceError> {
    if reply.error {
        return Err(DataSourceError::RemoteConnection {
            message: reply.message.unwrap_or_default(),
            data_source_key: reply.data_source_key.unwrap_or_else(|| data_source_key.to_string()),
            instance_no: reply.instance_no.unwrap_or_default(),
            status_no: reply.status_no.unwrap_or_default(),
            error_no: reply.error_no.unwrap_or_default(),
        });
    }

    let result_set = reply.first_result_set();
    let rows: Vec<Row> = result_set
        .map(|set| {
            set.rows()
                .iter()
                .map(|row| {
                    row.columns()
                        .iter()
                        .map(|column| {
                            let value = column.value.clone().map(Value::String).unwrap_or(Value::Null);
                            (column.name.clone(), value)
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();
    let row_count = result_set.and_then(|set| set.row_count());

    Ok(Response::new(data_source_key, Value::String(raw), rows).with_row_count(row_count))
}

/// Carries one legacy call and returns the raw reply document.
#[async_trait]
pub trait LegacyTransport: Send + Sync {
    async fn post(&self, call: &LegacyCall, credential: Option<&Credential>) -> Result<String, DataSourceError>;
}

/// SOAP over the retrying HTTP [`Transport`].
#[derive(Debug, Clone)]
pub struct SoapTransport {
    endpoint: String,
    transport: Transport,
    retry: RetryPolicy,
}

impl SoapTransport {
    pub fn new(endpoint: impl Into<String>, transport: Transport, retry: RetryPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            retry,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, DataSourceError> {
        Ok(Self::new(settings.legacy_endpoint()?, settings.transport(), settings.retry.clone()))
    }
}

#[async_trait]
impl LegacyTransport for SoapTransport {
    async fn post(&self, call: &LegacyCall, credential: Option<&Credential>) -> Result<String, DataSourceError> {
        let request = HttpRequest::new(Method::POST, self.endpoint.clone())
            .text(soap::CONTENT_TYPE, soap::build_envelope(call))
            .header("SOAPAction", format!("\"{}\"", soap::SOAP_ACTION))
            .auth(credential.cloned())
            .final_when_body_contains(soap::FAULT_MARKER);
        let reply = self.transport.execute(&request, &self.retry).await?;
        let status = reply.status.as_u16();
        // Faults are decoded by the caller; anything else is a transport failure.
        if !reply.is_success() && !reply.body.contains(soap::FAULT_MARKER) {
            return Err(DataSourceError::transport(
                status_error_message(status).unwrap_or_else(|| format!("HTTP {status}")),
                Some(status),
                Some(truncate_response_preview(&reply.body, 500)),
                1,
            ));
        }
        Ok(reply.body)
    }
}

/// Client for the legacy protocol.
pub struct LegacyDataSourceClient {
    transport: Arc<dyn LegacyTransport>,
    credentials: Arc<dyn CredentialResolver>,
    delimiter: String,
}

impl LegacyDataSourceClient {
    pub fn new(transport: Arc<dyn LegacyTransport>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            transport,
            credentials,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }

    pub fn from_settings(settings: &ClientSettings, credentials: Arc<dyn CredentialResolver>) -> Result<Self, DataSourceError> {
        Ok(Self::new(Arc::new(SoapTransport::from_settings(settings)?), credentials))
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub async fn execute(&self, tenant: &str, query: &QueryInput) -> Result<Response, DataSourceError> {
        let data_source_key = legacy_key(query)?;
        let encoding = encode(query, &self.delimiter)?;
        let credential = resolve_credential(&self.credentials, tenant).await?;

        let call = LegacyCall {
            data_source_key,
            parameter_names: encoding.names,
            parameter_values: encoding.values,
            delimiter: self.delimiter.clone(),
        };
        debug!(tenant, data_source_key, names = %call.parameter_names, "calling legacy data source");

        let key = data_source_key.to_string();
        let raw = self.transport.post(&call, Some(&credential)).await?;
        let reply = soap::decode_reply(&key, &raw)?;
        let response = reply_to_response(&key, raw, reply)?;
        info!(tenant, data_source_key, rows = response.rows().len(), "legacy data source call completed");
        Ok(response)
    }
}
