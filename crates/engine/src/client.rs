//! Client for the modern data source endpoint.

use std::sync::Arc;

use dsq_api::{ClientSettings, HttpRequest, RawReply, Transport};
use dsq_types::{DataSourceError, Response, RetryPolicy, Row};
use dsq_util::CredentialResolver;
use dsq_util::http::{status_error_message, truncate_response_preview};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use serde_json::Value;
use tracing::{info, warn};

use crate::classify::ResponseClassifier;
use crate::query::QueryInput;
use crate::tenants::{configured_tenants, resolve_credential};

/// Key added to every access entry naming the tenant it was listed for.
pub const TENANT_KEY: &str = "tenant";

/// Executes queries against `<base>/datasources/{id}/execute`.
///
/// One client serves any number of tenants; credentials are resolved per
/// call through the shared resolver, which caches them.
pub struct DataSourceClient {
    base_url: String,
    transport: Transport,
    retry: RetryPolicy,
    credentials: Arc<dyn CredentialResolver>,
}

/// Outcome of listing data source access across tenants.
///
/// Failures are collected per tenant; one tenant failing does not discard
/// the entries already gathered for others.
#[derive(Debug, Default)]
pub struct AccessReport {
    pub entries: Vec<Row>,
    pub failures: Vec<TenantFailure>,
}

#[derive(Debug)]
pub struct TenantFailure {
    pub tenant: String,
    pub error: DataSourceError,
}

impl AccessReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Entries as a [`Response`] labelled `all_access`.
    pub fn to_response(&self) -> Response {
        let raw = Value::Array(
            self.entries
                .iter()
                .map(|row| Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
                .collect(),
        );
        Response::new("all_access", raw, self.entries.clone())
    }
}

impl DataSourceClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Transport,
        retry: RetryPolicy,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, DataSourceError> {
        let base_url = base_url.into();
        dsq_api::validate_base_url(&base_url)?;
        retry.validate()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            retry,
            credentials,
        })
    }

    pub fn from_settings(settings: &ClientSettings, credentials: Arc<dyn CredentialResolver>) -> Result<Self, DataSourceError> {
        Self::new(
            settings.modern_base_url()?,
            settings.transport(),
            settings.retry.clone(),
            credentials,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn execute_url(&self, query: &QueryInput) -> String {
        format!(
            "{}/datasources/{}/execute?format={}",
            self.base_url,
            utf8_percent_encode(query.identifier(), NON_ALPHANUMERIC),
            query.call_format().number()
        )
    }

    /// Posts the composed body of `query` for `tenant` and classifies the reply.
    pub async fn execute(&self, tenant: &str, query: &QueryInput) -> Result<Response, DataSourceError> {
        let credential = resolve_credential(&self.credentials, tenant).await?;
        let request = HttpRequest::new(Method::POST, self.execute_url(query))
            .json(query.composed_body().clone())
            .auth(Some(credential));

        let reply = self.transport.execute(&request, &self.retry).await?;
        let payload = decode_payload(&reply)?;
        let status = reply.status.as_u16();

        let classifier = ResponseClassifier::new(query.identifier(), query.call_format());
        let response = match classifier.classify(payload, Some(status)) {
            Err(DataSourceError::ResponseShape { .. }) if !reply.is_success() => Err(status_failure(&reply)),
            other => other,
        }?;
        info!(
            tenant,
            identifier = %query.identifier(),
            rows = response.rows().len(),
            "data source call completed"
        );
        Ok(response)
    }

    /// Lists the data sources `tenant` may call, tagging each entry with the tenant.
    pub async fn list_access(&self, tenant: &str) -> Result<Vec<Row>, DataSourceError> {
        let credential = resolve_credential(&self.credentials, tenant).await?;
        let request = HttpRequest::new(Method::GET, format!("{}/datasources/search?name=", self.base_url))
            .auth(Some(credential));
        let reply = self.transport.execute(&request, &self.retry).await?;
        if !reply.is_success() {
            return Err(status_failure(&reply));
        }

        let Value::Array(entries) = decode_payload(&reply)? else {
            return Err(DataSourceError::response_shape("all_access", "expected an array of data sources"));
        };
        entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(fields) => {
                    let mut row: Row = fields.into_iter().collect();
                    row.insert(TENANT_KEY.to_string(), Value::String(tenant.to_string()));
                    Ok(row)
                }
                other => Err(DataSourceError::response_shape(
                    "all_access",
                    format!("expected a data source object, got {other}"),
                )),
            })
            .collect()
    }

    /// Lists access for each tenant in order, or for every configured tenant
    /// when `tenants` is `None`.
    pub async fn list_access_all(&self, tenants: Option<Vec<String>>) -> Result<AccessReport, DataSourceError> {
        let tenants = match tenants {
            Some(tenants) => tenants,
            None => configured_tenants(&self.credentials).await?,
        };

        let mut report = AccessReport::default();
        for tenant in tenants {
            match self.list_access(&tenant).await {
                Ok(entries) => report.entries.extend(entries),
                Err(error) => {
                    warn!(tenant = %tenant, error = %error, "listing data source access failed");
                    report.failures.push(TenantFailure { tenant, error });
                }
            }
        }
        Ok(report)
    }
}

fn decode_payload(reply: &RawReply) -> Result<Value, DataSourceError> {
    match reply.json() {
        Ok(payload) => Ok(payload),
        Err(_) if !reply.is_success() => Err(status_failure(reply)),
        Err(error) => Err(error),
    }
}

fn status_failure(reply: &RawReply) -> DataSourceError {
    let status = reply.status.as_u16();
    DataSourceError::transport(
        status_error_message(status).unwrap_or_else(|| format!("HTTP {status}")),
        Some(status),
        Some(truncate_response_preview(&reply.body, 500)),
        1,
    )
}
