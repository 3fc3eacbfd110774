//! Generic REST calls against the developer APIs.
//!
//! Unlike data sources these endpoints are addressed by full URL and take the
//! field map directly: as a JSON body for `POST`/`PUT`, as query parameters
//! otherwise. Replies from several tenants are flattened into one list.

use std::sync::Arc;

use dsq_api::{ClientSettings, HttpRequest, RawReply, Transport};
use dsq_types::{DataSourceError, FieldMap, Response, RetryPolicy, Row};
use dsq_util::CredentialResolver;
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, info};

use crate::query::QueryInput;
use crate::tenants::resolve_credential;

/// Header naming the tenant a REST call acts for.
pub const CUSTOMER_ID_HEADER: &str = "X-Plex-Connect-Customer-Id";

/// What a REST call sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    /// Named inputs, sent as a JSON object or as query parameters.
    Fields(FieldMap),
    /// A document sent verbatim, e.g. an unnamed array body.
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    method: Method,
    url: String,
    payload: ApiPayload,
}

impl ApiCall {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: ApiPayload::Fields(FieldMap::new()),
        }
    }

    /// Call fed by the current fields of `query`.
    pub fn from_query(method: Method, url: impl Into<String>, query: &QueryInput) -> Self {
        Self::new(method, url).with_fields(query.fields().clone())
    }

    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.payload = ApiPayload::Fields(fields);
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.payload = ApiPayload::Json(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload(&self) -> &ApiPayload {
        &self.payload
    }

    fn sends_body(&self) -> bool {
        self.method == Method::POST || self.method == Method::PUT
    }

    /// The request URL, with the payload appended as query parameters when
    /// the method carries no body. `null` inputs are omitted and array inputs
    /// repeat their key.
    pub fn request_url(&self) -> Result<String, DataSourceError> {
        let mut url = Url::parse(&self.url)
            .map_err(|error| DataSourceError::configuration(format!("invalid API URL '{}': {error}", self.url)))?;
        if self.sends_body() {
            return Ok(url.into());
        }

        let fields: FieldMap = match &self.payload {
            ApiPayload::Fields(fields) => fields.clone(),
            ApiPayload::Json(Value::Object(map)) => map.clone().into_iter().collect(),
            ApiPayload::Json(Value::Null) => FieldMap::new(),
            ApiPayload::Json(_) => {
                return Err(DataSourceError::configuration(format!(
                    "{} requests can only send an object as query parameters",
                    self.method
                )));
            }
        };
        if !fields.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &fields {
                match value {
                    Value::Null => {}
                    Value::Array(items) => {
                        for item in items {
                            pairs.append_pair(name, &query_text(item));
                        }
                    }
                    other => {
                        pairs.append_pair(name, &query_text(other));
                    }
                }
            }
        }
        Ok(url.into())
    }

    fn body(&self) -> Option<Value> {
        if !self.sends_body() {
            return None;
        }
        Some(match &self.payload {
            ApiPayload::Fields(fields) => Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            ApiPayload::Json(body) => body.clone(),
        })
    }
}

fn query_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Client for arbitrary developer API endpoints.
pub struct ApiClient {
    transport: Transport,
    retry: RetryPolicy,
    credentials: Arc<dyn CredentialResolver>,
}

impl ApiClient {
    pub fn new(
        transport: Transport,
        retry: RetryPolicy,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Result<Self, DataSourceError> {
        retry.validate()?;
        Ok(Self {
            transport,
            retry,
            credentials,
        })
    }

    pub fn from_settings(settings: &ClientSettings, credentials: Arc<dyn CredentialResolver>) -> Result<Self, DataSourceError> {
        Self::new(settings.transport(), settings.retry.clone(), credentials)
    }

    /// Sends `call` on behalf of `tenant` and returns the decoded reply.
    pub async fn call(&self, tenant: &str, call: &ApiCall) -> Result<Value, DataSourceError> {
        let url = call.request_url()?;
        dsq_api::validate_base_url(&url)?;
        let credential = resolve_credential(&self.credentials, tenant).await?;

        let mut request = HttpRequest::new(call.method().clone(), url.as_str())
            .header(CUSTOMER_ID_HEADER, tenant)
            .auth(Some(credential));
        if let Some(body) = call.body() {
            request = request.json(body);
        }

        debug!(tenant, method = %call.method(), url = %url, "calling API");
        let reply = self.transport.execute(&request, &self.retry).await?;
        if !reply.is_success() {
            return Err(api_failure(&url, &reply));
        }
        reply.json()
    }

    /// Sends `call` once per tenant, in order, and flattens the replies:
    /// list replies contribute their items, object replies themselves.
    /// The first failing tenant aborts the sequence.
    pub async fn call_all(&self, tenants: &[String], call: &ApiCall) -> Result<Response, DataSourceError> {
        let mut items = Vec::new();
        for tenant in tenants {
            match self.call(tenant, call).await? {
                Value::Array(entries) => items.extend(entries),
                Value::Null => {}
                other => items.push(other),
            }
        }

        let rows: Vec<Row> = items
            .iter()
            .filter_map(|item| item.as_object())
            .map(|fields| fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .collect();
        info!(url = %call.url(), tenants = tenants.len(), items = items.len(), "API call completed");
        Ok(Response::new(call.url(), Value::Array(items), rows))
    }
}

fn api_failure(url: &str, reply: &RawReply) -> DataSourceError {
    let body = reply.json().unwrap_or_else(|_| Value::String(reply.body.clone()));
    DataSourceError::Api {
        url: url.to_string(),
        status: reply.status.as_u16(),
        body,
    }
}
