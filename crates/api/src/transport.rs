//! Retrying HTTP transport shared by the modern and legacy clients.

use std::env;
use std::time::Duration;

use dsq_types::{Credential, DataSourceError, RetryPolicy};
use dsq_util::http::{parse_response_json_strict, status_error_message, truncate_response_preview};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

/// Header carrying an API-key credential.
pub const API_KEY_HEADER: &str = "X-Plex-Connect-Api-Key";

const BODY_PREVIEW_LIMIT: usize = 500;

/// Connection level options; retry lives in [`RetryPolicy`] so it can be
/// shared read-only across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Compatibility mode for older endpoints: HTTP/1.1 with TLS capped at
    /// 1.2. It does not enable legacy renegotiation, which the TLS backends
    /// reachable through reqwest do not expose.
    pub legacy_tls: bool,
    pub timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            legacy_tls: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Text { content_type: String, body: String },
}

/// A fully described request. Cloned into a fresh `reqwest` request for every attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
    pub auth: Option<Credential>,
    /// A retryable status whose body contains this marker is returned as a
    /// reply instead of retried.
    pub final_marker: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: RequestBody::None,
            headers: Vec::new(),
            auth: None,
            final_marker: None,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn text(mut self, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text {
            content_type: content_type.into(),
            body: body.into(),
        };
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn auth(mut self, credential: Option<Credential>) -> Self {
        self.auth = credential;
        self
    }

    /// Marks replies whose body contains `marker` as final, e.g. SOAP faults
    /// delivered with a 500 status.
    pub fn final_when_body_contains(mut self, marker: impl Into<String>) -> Self {
        self.final_marker = Some(marker.into());
        self
    }

    fn is_final_body(&self, body: &str) -> bool {
        self.final_marker.as_deref().is_some_and(|marker| body.contains(marker))
    }
}

/// Transport-agnostic reply: status, headers and the untouched body.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decodes the body as JSON. An empty body decodes to `null`.
    pub fn json(&self) -> Result<Value, DataSourceError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        parse_response_json_strict(&self.body, Some(self.status)).map_err(|error| {
            DataSourceError::transport(
                error.to_string(),
                Some(self.status.as_u16()),
                Some(error.body_preview().to_string()),
                1,
            )
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transport {
    settings: TransportSettings,
}

impl Transport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> TransportSettings {
        self.settings
    }

    fn build_client(&self) -> Result<Client, DataSourceError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder()
            .default_headers(default_headers)
            .user_agent(format!("dsq/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS))
            .timeout(Duration::from_secs(self.settings.timeout_secs));

        if self.settings.legacy_tls {
            // Approximation only: reqwest exposes no switch for unsafe legacy
            // renegotiation, so the closest available setting caps the
            // handshake at TLS 1.2 over HTTP/1.1.
            builder = builder
                .http1_only()
                .max_tls_version(reqwest::tls::Version::TLS_1_2);
        }

        builder
            .build()
            .map_err(|error| DataSourceError::configuration(format!("failed to build HTTP client: {error}")))
    }

    fn prepare(&self, client: &Client, request: &HttpRequest) -> Result<reqwest::RequestBuilder, DataSourceError> {
        let mut builder = client.request(request.method.clone(), &request.url);

        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| DataSourceError::configuration(format!("invalid header name '{name}': {error}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|error| DataSourceError::configuration(format!("invalid value for header '{name}': {error}")))?;
            builder = builder.header(header_name, header_value);
        }

        match &request.auth {
            Some(Credential::Basic { username, password }) => {
                builder = builder.basic_auth(username, Some(password));
            }
            Some(Credential::ApiKey(token)) => {
                let mut value = HeaderValue::from_str(token)
                    .map_err(|_| DataSourceError::configuration("API key contains characters not allowed in a header"))?;
                value.set_sensitive(true);
                builder = builder.header(API_KEY_HEADER, value);
            }
            None => {}
        }

        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Text { content_type, body } => builder
                .header(header::CONTENT_TYPE, content_type.as_str())
                .body(body.clone()),
        };

        Ok(builder)
    }

    /// Executes `request`, retrying connection failures and statuses listed in
    /// `retry.retryable_statuses` up to `retry.attempts` total tries.
    ///
    /// Non-retryable statuses are returned as a [`RawReply`] so callers can
    /// inspect error bodies. Exhausting the attempts yields
    /// [`DataSourceError::Transport`] with the last status and body observed.
    pub async fn execute(&self, request: &HttpRequest, retry: &RetryPolicy) -> Result<RawReply, DataSourceError> {
        retry.validate()?;
        let client = self.build_client()?;

        let mut last_status: Option<u16> = None;
        let mut last_body: Option<String> = None;
        let mut last_message = String::new();

        for attempt in 1..=retry.attempts {
            if attempt > 1 {
                let delay = retry.delay_for_retry(attempt - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            debug!(method = %request.method, url = %request.url, attempt, "sending request");
            let outcome = self.prepare(&client, request)?.send().await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    let body = response.text().await.map_err(|error| {
                        DataSourceError::transport(
                            format!("failed to read response body: {error}"),
                            Some(status.as_u16()),
                            None,
                            attempt,
                        )
                    })?;

                    if retry.is_retryable(status.as_u16()) && !request.is_final_body(&body) {
                        warn!(
                            url = %request.url,
                            status = status.as_u16(),
                            attempt,
                            attempts = retry.attempts,
                            "retryable status"
                        );
                        last_message = status_error_message(status.as_u16())
                            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
                        last_status = Some(status.as_u16());
                        last_body = Some(truncate_response_preview(&body, BODY_PREVIEW_LIMIT));
                        continue;
                    }

                    return Ok(RawReply { status, headers, body });
                }
                Err(error) if error.is_builder() => {
                    return Err(DataSourceError::configuration(format!("invalid request: {error}")));
                }
                Err(error) => {
                    warn!(url = %request.url, attempt, attempts = retry.attempts, error = %error, "request failed");
                    last_message = format!("network error: {error}");
                    last_status = None;
                    last_body = None;
                }
            }
        }

        Err(DataSourceError::transport(
            last_message,
            last_status,
            last_body,
            retry.attempts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn transport() -> Transport {
        Transport::new(TransportSettings {
            legacy_tls: false,
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn retries_exactly_attempts_times_on_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let request = HttpRequest::new(Method::POST, format!("{}/flaky", server.uri())).json(json!({"a": 1}));
        let error = transport().execute(&request, &fast_retry(3)).await.unwrap_err();

        match error {
            DataSourceError::Transport { status, body, attempts, .. } => {
                assert_eq!(status, Some(503));
                assert_eq!(body.as_deref(), Some("busy"));
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": [{"message": "nope"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let request = HttpRequest::new(Method::POST, format!("{}/bad", server.uri()));
        let reply = transport().execute(&request, &fast_retry(5)).await.unwrap();
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json().unwrap()["errors"][0]["message"], "nope");
    }

    #[test]
    fn legacy_tls_mode_builds_a_client() {
        let legacy = Transport::new(TransportSettings::default());
        assert!(legacy.settings().legacy_tls);
        assert!(legacy.build_client().is_ok());
        assert!(transport().build_client().is_ok());
    }

    #[tokio::test]
    async fn final_body_marker_stops_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/soap"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<soap:Fault><faultstring>bad</faultstring></soap:Fault>"))
            .expect(1)
            .mount(&server)
            .await;

        let request = HttpRequest::new(Method::POST, format!("{}/soap", server.uri())).final_when_body_contains("Fault>");
        let reply = transport().execute(&request, &fast_retry(4)).await.unwrap();
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body.contains("faultstring"));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/eventually"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
            .mount(&server)
            .await;

        let request = HttpRequest::new(Method::GET, format!("{}/eventually", server.uri()));
        let reply = transport().execute(&request, &fast_retry(4)).await.unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.json().unwrap(), json!({"rows": []}));
    }

    #[tokio::test]
    async fn sends_credentials_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/key"))
            .and(header_matcher(API_KEY_HEADER, "secret-token"))
            .and(body_json(json!({"inputs": {"Part_No": "A-1"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/basic"))
            // "user:pass" base64 encoded
            .and(header_matcher("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let keyed = HttpRequest::new(Method::POST, format!("{}/key", server.uri()))
            .json(json!({"inputs": {"Part_No": "A-1"}}))
            .auth(Some(Credential::api_key("secret-token")));
        let basic = HttpRequest::new(Method::POST, format!("{}/basic", server.uri()))
            .auth(Some(Credential::basic("user", "pass")));

        assert!(transport().execute(&keyed, &fast_retry(1)).await.unwrap().is_success());
        assert!(transport().execute(&basic, &fast_retry(1)).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn network_failure_is_retried_then_reported() {
        // Bind and drop a listener so the port refuses connections.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let request = HttpRequest::new(Method::GET, format!("http://127.0.0.1:{port}/"));
        let error = transport().execute(&request, &fast_retry(2)).await.unwrap_err();
        match error {
            DataSourceError::Transport { status, attempts, .. } => {
                assert_eq!(status, None);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_body_decodes_to_null() {
        let reply = RawReply {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: "  ".into(),
        };
        assert_eq!(reply.json().unwrap(), Value::Null);
    }
}
