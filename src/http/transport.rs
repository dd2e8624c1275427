use super::{ApiRequest, ApiResponse};
use crate::config::HttpConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use hyper::ext::ReasonPhrase;
use std::time::Duration;
use tracing::debug;

/// One network round trip. Implementations must buffer the whole response body.
///
/// The retry middleware wraps a transport; it never sees connection pooling, TLS or proxies.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Build the shared `reqwest` client from `[http]` settings.
pub fn build_http_client(cfg: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.request_timeout_secs));
    if let Some(proxy_url) = cfg.proxy.as_ref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    if cfg.enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        builder = builder.http1_only();
    }
    builder.build()
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        // hyper only records the phrase when it differs from the canonical one.
        let reason = resp
            .extensions()
            .get::<ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned());
        let body = resp.bytes().await?.to_vec();

        debug!(
            method = %request.method,
            uri = %request.url,
            %status,
            body_len = body.len(),
            "[RestApi] Transport round trip finished"
        );

        let response = ApiResponse::new(status, body).with_headers(headers);
        Ok(match reason {
            Some(reason) => response.with_reason(reason),
            None => response,
        })
    }
}
