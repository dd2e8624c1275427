use crate::config::OauthConfig;
use crate::error::{IsRetryable, OauthError, RestError};
use crate::oauth_utils::{OauthTokenResponse, StandardOauth2Client, build_oauth2_client};
use crate::utils::jwt::attach_identity_claims;
use authrest_schema::TokenGrant;
use backon::{ExponentialBuilder, Retryable};
use oauth2::{AuthorizationCode, RedirectUrl, RefreshToken};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

/// Backoff for transport failures against the token endpoint only.
static OAUTH_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
});

pub const DEFAULT_APPROVAL_PROMPT: &str = "force";
pub const DEFAULT_ACCESS_TYPE: &str = "offline";

/// Query parameters of the consent-screen URL.
#[derive(Debug, Clone)]
pub struct AuthorizationUrlParams {
    pub redirect_uri: String,
    pub scope: String,
    pub approval_prompt: String,
    pub access_type: String,
    pub state: Option<String>,
}

impl AuthorizationUrlParams {
    pub fn new(redirect_uri: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            approval_prompt: DEFAULT_APPROVAL_PROMPT.to_string(),
            access_type: DEFAULT_ACCESS_TYPE.to_string(),
            state: None,
        }
    }

    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Token and consent endpoints of one OAuth client.
#[derive(Debug, Clone)]
pub struct OauthEndpoints {
    client: StandardOauth2Client,
    auth_url: Url,
    client_id: String,
    http: reqwest::Client,
}

impl OauthEndpoints {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        cfg: &OauthConfig,
        http: reqwest::Client,
    ) -> Result<Self, RestError> {
        let secret = (!client_secret.is_empty()).then_some(client_secret);
        let client = build_oauth2_client(
            client_id,
            secret,
            cfg.auth_url.as_str(),
            cfg.token_url.as_str(),
        )?;
        Ok(Self {
            client,
            auth_url: cfg.auth_url.clone(),
            client_id: client_id.to_string(),
            http,
        })
    }

    /// Consent-screen URL. Parameter order is fixed; `state` is appended only when given.
    pub fn authorization_url(&self, params: &AuthorizationUrlParams) -> Url {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &params.redirect_uri)
                .append_pair("client_id", &self.client_id)
                .append_pair("scope", &params.scope)
                .append_pair("access_type", &params.access_type)
                .append_pair("approval_prompt", &params.approval_prompt);
            if let Some(state) = params.state.as_deref() {
                query.append_pair("state", state);
            }
        }
        url
    }

    /// `grant_type=refresh_token` exchange. Network failures are retried with a short backoff;
    /// any answer from the endpoint is final.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<OauthTokenResponse, OauthError> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        (|| async {
            let token: OauthTokenResponse = self
                .client
                .exchange_refresh_token(&refresh_token)
                .request_async(&self.http)
                .await?;
            Ok::<_, OauthError>(token)
        })
        .retry(*OAUTH_RETRY_POLICY)
        .when(|e: &OauthError| e.is_retryable())
        .notify(|err, dur: Duration| {
            error!(
                "OAuth2 refresh retrying error {} with sleeping {:?}",
                err.to_string(),
                dur
            );
        })
        .await
    }

    /// `grant_type=authorization_code` exchange for the code returned to `redirect_uri`.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OauthTokenResponse, RestError> {
        let client = self
            .client
            .clone()
            .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);
        let token: OauthTokenResponse = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(OauthError::from)
            .map_err(crate::error::AuthRefreshError::from)?;
        info!("OAuth2 code exchange completed successfully");
        Ok(token)
    }
}

/// Full token endpoint payload, with `email`/`sub` lifted from the `id_token` when present.
pub(crate) fn into_grant(token: &OauthTokenResponse) -> Result<TokenGrant, serde_json::Error> {
    let mut value = serde_json::to_value(token)?;
    attach_identity_claims(&mut value);
    serde_json::from_value(value)
}
