// REST client
// Every REST call goes through `ApiClient::request`: bearer auth, payload placement
// and status-code mapping live here, the endpoint wrappers only build parameters

use crate::config::ClientConfig;
use crate::envelope::EnvelopeWriteError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// Error kinds surfaced to callers, one per status class the API documents
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Gateway timeout")]
    GatewayTimeout,

    #[error("API error: {status_code} - {message}")]
    UnexpectedStatus { status_code: u16, message: String },

    #[error("No access token available")]
    NotAuthorized,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeWriteError),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_)
                | ApiError::RateLimited(_)
                | ApiError::ServiceUnavailable
                | ApiError::GatewayTimeout
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Patch,
    Post,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "POST" => Ok(HttpMethod::Post),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ApiError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

// Where the request data goes. GET only ever sends query parameters and
// DELETE never sends a body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Query(Vec<(String, String)>),
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in_secs: Option<i64>) -> Self {
        Self {
            value: value.into(),
            expires_at: expires_in_secs.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expiry| expiry <= now)
    }
}

// Source of bearer tokens. Consulted whenever the cached token is missing or expired.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn fetch_token(&self) -> Result<AccessToken, ApiError>;
}

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken, ApiError> {
        Ok(AccessToken::new(self.token.clone(), None))
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    base_url: String,
    token: RwLock<Option<AccessToken>>,
    provider: Option<Arc<dyn TokenProvider>>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            config,
            token: RwLock::new(None),
            provider: None,
        })
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    // Point the client somewhere other than the environment's host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_token(&self, token: AccessToken) {
        *self.token.write() = Some(token);
    }

    pub fn make_endpoint(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    // Current bearer token, refreshed through the provider when missing or expired
    pub async fn authenticate(&self) -> Result<String, ApiError> {
        let now = Utc::now();
        let cached = self
            .token
            .read()
            .as_ref()
            .filter(|token| !token.is_expired(now))
            .map(|token| token.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }

        let provider = self.provider.as_ref().ok_or(ApiError::NotAuthorized)?;
        let token = provider.fetch_token().await?;
        info!(expires_at = ?token.expires_at, "obtained new access token");

        let value = token.value.clone();
        self.set_token(token);
        Ok(value)
    }

    pub async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Payload,
        additional_headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let bearer = self.authenticate().await?;
        let request = self.build_request(method, endpoint, payload, additional_headers, &bearer)?;

        debug!(%method, url = %request.url(), "sending request");
        let response = self.http.execute(request).await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        verify_response(status, &body)?;
        decode_body(&body)
    }

    pub fn build_request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        payload: Payload,
        additional_headers: &[(&str, &str)],
        bearer: &str,
    ) -> Result<reqwest::Request, ApiError> {
        let mut headers = HeaderMap::new();
        for (name, value) in additional_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
            headers.insert(name, value);
        }
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        let mut builder = self
            .http
            .request(method.as_reqwest(), self.make_endpoint(endpoint))
            .headers(headers);

        builder = match (method, payload) {
            (_, Payload::None) => builder,
            (HttpMethod::Get, Payload::Query(params) | Payload::Form(params)) => {
                builder.query(&params)
            }
            (HttpMethod::Get, Payload::Json(_)) => {
                return Err(ApiError::InvalidInput(
                    "GET requests only carry query parameters".to_string(),
                ))
            }
            (_, Payload::Query(params)) => builder.query(&params),
            (HttpMethod::Delete, _) => builder,
            (_, Payload::Form(params)) => builder.form(&params),
            (_, Payload::Json(value)) => {
                let body =
                    serde_json::to_vec(&value).map_err(|e| ApiError::InvalidInput(e.to_string()))?;
                builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
            }
        };

        builder.build().map_err(ApiError::from)
    }
}

// Map a response status to the matching error kind; 2xx passes
pub fn verify_response(status: u16, body: &Bytes) -> Result<(), ApiError> {
    if (200..300).contains(&status) {
        return Ok(());
    }

    let message = String::from_utf8_lossy(body).into_owned();
    warn!(status, "request failed");

    Err(match status {
        400 => ApiError::BadRequest(message),
        401 => ApiError::Unauthenticated(message),
        403 => ApiError::Forbidden(message),
        404 => ApiError::NotFound(message),
        405 => ApiError::MethodNotAllowed,
        406 => ApiError::NotAcceptable(message),
        429 => ApiError::RateLimited(message),
        500 => ApiError::InternalServerError(message),
        503 => ApiError::ServiceUnavailable,
        504 => ApiError::GatewayTimeout,
        _ => ApiError::UnexpectedStatus {
            status_code: status,
            message,
        },
    })
}

fn decode_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}

// Loopback HTTP responder with canned answers, shared by the REST and SOAP tests
#[cfg(test)]
pub mod mock_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    pub const JSON: &str = "application/json";
    pub const XML: &str = "text/xml; charset=utf-8";

    // Answers one connection per canned response and hands back the raw requests
    pub async fn serve(
        content_type: &'static str,
        responses: Vec<(u16, &'static str)>,
    ) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    content_type,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            seen
        });

        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
