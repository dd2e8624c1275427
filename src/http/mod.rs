mod transport;

pub use transport::{HttpTransport, ReqwestTransport, build_http_client};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use url::Url;

pub const BEARER_PREFIX: &str = "Bearer ";

/// Immutable snapshot of an outbound request. Re-sent as-is on every attempt, except for
/// the `Authorization` header which a credential refresh may replace.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    issued_token: Option<String>,
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("issued_token", &self.issued_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            issued_token: None,
        }
    }

    /// Attach a token handed out by the credential manager.
    ///
    /// The token is remembered separately from the header, so a caller-supplied
    /// `Authorization` does not hide which credential this exchange was issued.
    pub fn set_issued_bearer(&mut self, token: &str) -> Result<(), InvalidHeaderValue> {
        self.set_bearer(token)?;
        self.issued_token = Some(token.to_string());
        Ok(())
    }

    /// Token the credential manager issued for this exchange, if any.
    pub fn issued_token(&self) -> Option<&str> {
        self.issued_token.as_deref()
    }

    /// Replace (never append) the `Authorization` header with `Bearer <token>`.
    pub fn set_bearer(&mut self, token: &str) -> Result<(), InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Token currently carried in `Authorization`, if it is a bearer credential.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        self.body
            .as_deref()
            .map_or(Cow::Borrowed(""), String::from_utf8_lossy)
    }
}

/// Fully buffered response. The decider, the retry log and the caller all see the same bytes.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// Reason phrase. Transports fill in the canonical phrase when the wire carries none.
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
