use crate::config::Config;
use crate::credentials::{
    AuthType, AuthorizationUrlParams, Credential, CredentialManager, MetadataServerTokenSource,
    OAuthCredential, RefreshCallback, ServiceAccountCredential, TokenPair,
};
use crate::error::RestError;
use crate::http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, build_http_client};
use crate::retry::{CredentialRefreshMutator, RetryMiddleware, RetryPolicy, StatusRetryDecider};
use crate::utils::logging::{RetryEventSink, TracingRetrySink, with_pretty_json_debug};
use authrest_schema::TokenGrant;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const ALLOWED_METHODS: [&str; 7] = ["get", "head", "post", "put", "patch", "delete", "options"];

/// Payload of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`.
    Json(Value),
    /// Encoded as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    Raw {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl RequestBody {
    fn into_parts(self) -> Result<(Option<HeaderValue>, Vec<u8>), RestError> {
        match self {
            RequestBody::Json(value) => {
                with_pretty_json_debug(&value, |pretty| {
                    debug!(body = %pretty, "[RestApi] JSON request body");
                });
                Ok((
                    Some(HeaderValue::from_static("application/json")),
                    serde_json::to_vec(&value)?,
                ))
            }
            RequestBody::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                Ok((
                    Some(HeaderValue::from_static(
                        "application/x-www-form-urlencoded",
                    )),
                    encoded.into_bytes(),
                ))
            }
            RequestBody::Raw {
                content_type,
                bytes,
            } => {
                let content_type = content_type
                    .map(|ct| HeaderValue::from_str(&ct))
                    .transpose()
                    .map_err(|_| RestError::configuration("Invalid content type"))?;
                Ok((content_type, bytes))
            }
        }
    }
}

enum PendingCredential {
    Explicit(Credential),
    OauthFromConfig,
    MetadataServer,
}

/// Builder for [`RestClient`]. Only the credential is mandatory.
pub struct RestClientBuilder {
    config: Config,
    credential: Option<PendingCredential>,
    http: Option<reqwest::Client>,
    transport: Option<Arc<dyn HttpTransport>>,
    retry_policy: Option<RetryPolicy>,
    sink: Option<Arc<dyn RetryEventSink>>,
    on_refresh: Option<RefreshCallback>,
}

impl RestClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            credential: None,
            http: None,
            transport: None,
            retry_policy: None,
            sink: None,
            on_refresh: None,
        }
    }

    #[must_use]
    pub fn oauth(mut self, credential: OAuthCredential) -> Self {
        self.credential = Some(PendingCredential::Explicit(Credential::OAuth(credential)));
        self
    }

    /// OAuth client id, secret and tokens from the `[oauth]` table.
    #[must_use]
    pub fn oauth_from_config(mut self) -> Self {
        self.credential = Some(PendingCredential::OauthFromConfig);
        self
    }

    #[must_use]
    pub fn service_account(mut self, credential: ServiceAccountCredential) -> Self {
        self.credential = Some(PendingCredential::Explicit(Credential::ServiceAccount(
            credential,
        )));
        self
    }

    /// Service account backed by the metadata server and scopes from `[service_account]`.
    #[must_use]
    pub fn service_account_from_config(mut self) -> Self {
        self.credential = Some(PendingCredential::MetadataServer);
        self
    }

    /// Client used for token endpoints and, unless [`Self::transport`] is set, API calls.
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to `RetryPolicy::from_config(&config.retry)`.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn RetryEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn on_refresh(mut self, callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_refresh = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<RestClient, RestError> {
        let http = match self.http {
            Some(http) => http,
            None => build_http_client(&self.config.http).map_err(|e| {
                RestError::configuration(format!("Failed to build HTTP client: {e}"))
            })?,
        };

        let credential = match self.credential {
            Some(PendingCredential::Explicit(credential)) => credential,
            Some(PendingCredential::OauthFromConfig) => {
                let oauth = &self.config.oauth;
                Credential::OAuth(OAuthCredential::new(
                    oauth.client_id.clone(),
                    oauth.client_secret.clone(),
                    oauth.access_token.clone(),
                    oauth.refresh_token.clone(),
                ))
            }
            Some(PendingCredential::MetadataServer) => {
                let sa = &self.config.service_account;
                let source =
                    MetadataServerTokenSource::new(http.clone(), sa.metadata_url.clone());
                Credential::ServiceAccount(ServiceAccountCredential::new(
                    Arc::new(source),
                    sa.scopes.iter().cloned(),
                ))
            }
            None => {
                return Err(RestError::configuration(
                    "Either OAuth or service account credentials are required",
                ));
            }
        };

        let credentials = Arc::new(CredentialManager::new(
            credential,
            &self.config.oauth,
            http.clone(),
        )?);
        if let Some(callback) = self.on_refresh {
            credentials.set_refresh_callback(callback);
        }

        let policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.retry));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingRetrySink));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(http)));

        let middleware = RetryMiddleware::new(
            transport,
            Arc::new(StatusRetryDecider::new(&policy, sink)),
            Arc::new(CredentialRefreshMutator::new(credentials.clone())),
            policy.delay.clone(),
        );

        debug!(
            auth_type = %credentials.auth_type(),
            api_url = %self.config.http.api_url,
            max_attempts = policy.max_attempts,
            "[RestApi] Client ready"
        );

        Ok(RestClient {
            api_url: self.config.http.api_url,
            credentials,
            middleware,
        })
    }
}

/// Authenticated REST client with retry, backoff and credential refresh.
#[derive(Clone)]
pub struct RestClient {
    api_url: Url,
    credentials: Arc<CredentialManager>,
    middleware: RetryMiddleware,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("api_url", &self.api_url.as_str())
            .field("auth_type", &self.auth_type())
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn builder(config: Config) -> RestClientBuilder {
        RestClientBuilder::new(config)
    }

    pub fn with_oauth(config: Config, credential: OAuthCredential) -> Result<Self, RestError> {
        Self::builder(config).oauth(credential).build()
    }

    pub fn with_service_account(
        config: Config,
        credential: ServiceAccountCredential,
    ) -> Result<Self, RestError> {
        Self::builder(config).service_account(credential).build()
    }

    pub fn auth_type(&self) -> AuthType {
        self.credentials.auth_type()
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Current bearer token. Service accounts fetch one if the cache is cold or expiring.
    pub async fn access_token(&self) -> Result<String, RestError> {
        Ok(self.credentials.bearer_token().await?)
    }

    /// Current OAuth pair; `None` for service accounts.
    pub fn token_pair(&self) -> Option<Arc<TokenPair>> {
        self.credentials.token_pair()
    }

    /// Run the refresh-token grant now and return the new pair.
    pub async fn refresh_token(&self) -> Result<Arc<TokenPair>, RestError> {
        self.credentials.refresh_oauth_token().await
    }

    pub fn set_credentials(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<(), RestError> {
        self.credentials.set_tokens(access_token, refresh_token)
    }

    pub fn set_refresh_callback(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.credentials.set_refresh_callback(Arc::new(callback));
    }

    pub fn authorization_url(&self, params: &AuthorizationUrlParams) -> Result<Url, RestError> {
        self.credentials.authorization_url(params)
    }

    pub async fn authorize(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, RestError> {
        self.credentials.authorize(code, redirect_uri).await
    }

    /// Send one request through the retry pipeline.
    ///
    /// `url` may be absolute or relative to the configured API base. `Accept` and
    /// `Authorization` are set first, so `headers` can override either.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: HeaderMap,
        body: Option<RequestBody>,
    ) -> Result<ApiResponse, RestError> {
        let method = parse_method(method)?;
        let url = self.resolve_url(url)?;
        self.credentials.validate()?;
        let token = self.credentials.bearer_token().await?;

        let mut request = ApiRequest::new(method, url);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request
            .set_issued_bearer(&token)
            .map_err(|_| RestError::configuration("Access token is not a valid header value"))?;

        if let Some(body) = body {
            let (content_type, bytes) = body.into_parts()?;
            if let Some(content_type) = content_type {
                request.headers.insert(CONTENT_TYPE, content_type);
            }
            request.body = Some(bytes);
        }

        let mut last_name = None;
        for (name, value) in headers {
            // HeaderMap yields `None` for repeated values of the previous name.
            match name {
                Some(name) => {
                    request.headers.insert(name.clone(), value);
                    last_name = Some(name);
                }
                None => {
                    if let Some(name) = last_name.clone() {
                        request.headers.append(name, value);
                    }
                }
            }
        }

        let response = self.middleware.execute(request).await?;
        RestError::check_status(response)
    }

    pub async fn get(&self, url: &str) -> Result<ApiResponse, RestError> {
        self.request("get", url, HeaderMap::new(), None).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RestError> {
        Ok(self.get(url).await?.json()?)
    }

    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<ApiResponse, RestError> {
        let body = RequestBody::Json(serde_json::to_value(body)?);
        self.request("post", url, HeaderMap::new(), Some(body)).await
    }

    fn resolve_url(&self, url: &str) -> Result<Url, RestError> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.api_url.join(url)?),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_method(method: &str) -> Result<Method, RestError> {
    let lower = method.to_ascii_lowercase();
    if !ALLOWED_METHODS.contains(&lower.as_str()) {
        return Err(RestError::configuration("Wrong http method specified"));
    }
    Method::from_bytes(lower.to_ascii_uppercase().as_bytes())
        .map_err(|_| RestError::configuration("Wrong http method specified"))
}
