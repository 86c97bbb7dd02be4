//! HTTP transport seam for the request gateway.
//!
//! The gateway's retry and refresh logic lives above this trait, so tests
//! drive it with scripted transports instead of a live backend.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;

/// Transport-level failures, before any HTTP status is available.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else the HTTP stack reports.
    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// HTTP methods the order backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    const fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One request against the backend, path relative to the base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Bearer token attached by the gateway; `None` for public endpoints.
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// Build a request with no body and no token.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach (or replace) the bearer token.
    #[must_use]
    pub fn with_bearer(mut self, bearer: Option<String>) -> Self {
        self.bearer = bearer;
        self
    }
}

/// A completed HTTP exchange: status plus the raw body text.
///
/// The body is kept as text so parse failures can log what the backend
/// actually sent.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub const UNAUTHORIZED: u16 = 401;

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Executes requests against the order backend.
///
/// The production implementation is [`HttpTransport`]; tests substitute
/// scripted transports to exercise the gateway's failure paths.
pub trait Transport: Send + Sync + 'static {
    /// Execute one HTTP exchange.
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

// =============================================================================
// HttpTransport
// =============================================================================

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from configuration.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_base_url.clone(),
            timeout: config.request_timeout,
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        // Join by hand: Url::join would drop the base path unless it ends
        // with a slash.
        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut builder = self
            .client
            .request(request.method.as_reqwest(), url)
            .timeout(self.timeout);

        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        // Body read as text first so callers can log unparseable payloads
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        let ok = ApiResponse {
            status: 204,
            body: String::new(),
        };
        assert!(ok.is_success());

        let unauthorized = ApiResponse {
            status: ApiResponse::UNAUTHORIZED,
            body: String::new(),
        };
        assert!(!unauthorized.is_success());
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::new(Method::Post, "/auth/login")
            .with_body(serde_json::json!({"email": "a@b.c"}))
            .with_bearer(Some("token".into()));

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/auth/login");
        assert!(request.body.is_some());
        assert_eq!(request.bearer.as_deref(), Some("token"));
    }
}
