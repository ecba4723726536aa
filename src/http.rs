/// HTTP transport abstraction
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Default bound applied to every network call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// Where request parameters are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Appended to the URL query string
    Query,
    /// Sent as an `application/x-www-form-urlencoded` body
    Form,
}

/// A single request to issue against a JSON API
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub encoding: BodyEncoding,
}

impl HttpRequest {
    /// GET with query parameters
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            params: Vec::new(),
            encoding: BodyEncoding::Query,
        }
    }

    /// POST with a form-encoded body
    pub fn post_form(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            params: Vec::new(),
            encoding: BodyEncoding::Form,
        }
    }

    /// Append a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// First value of a parameter, if set
    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// Parameters carry secrets and tokens; only their names are printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.params.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("params", &keys)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Asynchronous JSON-over-HTTP transport
///
/// The flow and resource clients only ever talk to this trait; production code
/// uses [`ReqwestHttpClient`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue the request once and decode the response body as JSON.
    ///
    /// Non-success statuses are reported as [`TransportError::Status`].
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError>;
}

/// Send `request` once, failing with [`TransportError::Timeout`] after `timeout`
pub async fn send_with_timeout<H: HttpClient + ?Sized>(
    http: &H,
    request: HttpRequest,
    timeout: Duration,
) -> Result<Value, TransportError> {
    match tokio::time::timeout(timeout, http.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

/// [`HttpClient`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client with the default 30 second timeout
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pinauth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest::Client`
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        let builder = match request.encoding {
            BodyEncoding::Query => builder.query(&request.params),
            BodyEncoding::Form => builder.form(&request.params),
        };

        let response = builder
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        debug!(status = status.as_u16(), url = %request.url, "received response");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
