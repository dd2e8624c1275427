use super::endpoints::{AuthorizationUrlParams, OauthEndpoints, into_grant};
use super::service_account::{CachedToken, TokenSource};
use super::{AuthType, Credential, TokenPair};
use crate::config::OauthConfig;
use crate::error::{AuthRefreshError, RestError};
use authrest_schema::TokenGrant;
use chrono::Utc;
use oauth2::TokenResponse;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Invoked with `(access_token, refresh_token)` whenever the OAuth pair changes.
pub type RefreshCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

enum AuthState {
    OAuth {
        endpoints: OauthEndpoints,
        tokens: RwLock<Arc<TokenPair>>,
    },
    ServiceAccount {
        source: Arc<dyn TokenSource>,
        scopes: BTreeSet<String>,
        cache: RwLock<Option<CachedToken>>,
    },
}

/// Owns the active credential and serializes every token refresh.
///
/// Readers take a cheap snapshot of the current token. Writers go through `refresh_gate`, so
/// concurrent 401s on the same stale token trigger one exchange and the rest reuse its result.
pub struct CredentialManager {
    state: AuthState,
    refresh_gate: Mutex<()>,
    on_refresh: RwLock<Option<RefreshCallback>>,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("auth_type", &self.auth_type())
            .finish_non_exhaustive()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialManager {
    pub fn new(
        credential: Credential,
        oauth: &OauthConfig,
        http: reqwest::Client,
    ) -> Result<Self, RestError> {
        let state = match credential {
            Credential::OAuth(cred) => {
                let endpoints =
                    OauthEndpoints::new(&cred.client_id, &cred.client_secret, oauth, http)?;
                AuthState::OAuth {
                    endpoints,
                    tokens: RwLock::new(Arc::new(TokenPair {
                        access_token: cred.access_token,
                        refresh_token: cred.refresh_token,
                    })),
                }
            }
            Credential::ServiceAccount(cred) => {
                if cred.scopes.is_empty() {
                    return Err(RestError::configuration(
                        "Service account configuration and scopes are required",
                    ));
                }
                let cache = match (cred.cached_token, cred.expires_at) {
                    (Some(access_token), Some(expires_at)) => Some(CachedToken {
                        access_token,
                        expires_at,
                    }),
                    _ => None,
                };
                AuthState::ServiceAccount {
                    source: cred.source,
                    scopes: cred.scopes,
                    cache: RwLock::new(cache),
                }
            }
        };

        Ok(Self {
            state,
            refresh_gate: Mutex::new(()),
            on_refresh: RwLock::new(None),
        })
    }

    /// Checked before every API request. The authorization-code flow may start with no tokens.
    pub fn validate(&self) -> Result<(), RestError> {
        if let AuthState::OAuth { tokens, .. } = &self.state {
            let pair = read(tokens);
            if pair.access_token.is_empty() && pair.refresh_token.is_empty() {
                return Err(RestError::configuration(
                    "Access token or refresh token is required for OAuth authentication",
                ));
            }
        }
        Ok(())
    }

    pub fn auth_type(&self) -> AuthType {
        match &self.state {
            AuthState::OAuth { .. } => AuthType::OAuth,
            AuthState::ServiceAccount { .. } => AuthType::ServiceAccount,
        }
    }

    pub fn set_refresh_callback(&self, callback: RefreshCallback) {
        *write(&self.on_refresh) = Some(callback);
    }

    /// Current OAuth pair; `None` in service-account mode.
    pub fn token_pair(&self) -> Option<Arc<TokenPair>> {
        match &self.state {
            AuthState::OAuth { tokens, .. } => Some(read(tokens).clone()),
            AuthState::ServiceAccount { .. } => None,
        }
    }

    /// Token last handed out, without refreshing. Empty if none is known yet.
    pub fn current_token(&self) -> String {
        match &self.state {
            AuthState::OAuth { tokens, .. } => read(tokens).access_token.clone(),
            AuthState::ServiceAccount { cache, .. } => read(cache)
                .as_ref()
                .map(|c| c.access_token.clone())
                .unwrap_or_default(),
        }
    }

    /// Replace the OAuth pair from outside, e.g. after the caller restored persisted tokens.
    pub fn set_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<(), RestError> {
        let AuthState::OAuth { tokens, .. } = &self.state else {
            return Err(RestError::configuration(
                "Tokens can only be set for OAuth authentication",
            ));
        };
        let pair = TokenPair {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        };
        if pair.access_token.is_empty() && pair.refresh_token.is_empty() {
            return Err(RestError::configuration(
                "Access token or refresh token is required for OAuth authentication",
            ));
        }
        *write(tokens) = Arc::new(pair);
        Ok(())
    }

    /// Token to put on an outgoing request.
    ///
    /// OAuth returns the stored access token as-is (possibly empty). Service accounts return the
    /// cached token while fresh and fetch a new one otherwise.
    pub async fn bearer_token(&self) -> Result<String, AuthRefreshError> {
        match &self.state {
            AuthState::OAuth { tokens, .. } => Ok(read(tokens).access_token.clone()),
            AuthState::ServiceAccount {
                source,
                scopes,
                cache,
            } => {
                if let Some(token) = fresh_cached(cache) {
                    return Ok(token);
                }
                let _gate = self.refresh_gate.lock().await;
                if let Some(token) = fresh_cached(cache) {
                    return Ok(token);
                }
                fetch_service_account_token(source.as_ref(), scopes, cache).await
            }
        }
    }

    /// Obtain a new token after the server rejected `stale_token`.
    ///
    /// If another caller already replaced `stale_token` while this one waited for the gate,
    /// the newer token is returned without another exchange.
    pub async fn refresh(&self, stale_token: Option<&str>) -> Result<String, AuthRefreshError> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(stale) = stale_token {
            let current = self.current_token();
            if !current.is_empty() && current != stale {
                debug!(
                    auth_type = %self.auth_type(),
                    "[Credentials] Token already rotated by a concurrent refresh"
                );
                return Ok(current);
            }
        }

        match &self.state {
            AuthState::OAuth { endpoints, tokens } => self
                .refresh_oauth_locked(endpoints, tokens)
                .await
                .map(|pair| pair.access_token.clone()),
            AuthState::ServiceAccount {
                source,
                scopes,
                cache,
            } => fetch_service_account_token(source.as_ref(), scopes, cache).await,
        }
    }

    /// Force a `refresh_token` exchange. OAuth only.
    pub async fn refresh_oauth_token(&self) -> Result<Arc<TokenPair>, RestError> {
        let AuthState::OAuth { endpoints, tokens } = &self.state else {
            return Err(RestError::configuration(
                "Refresh token is not applicable for service account authentication",
            ));
        };
        let _gate = self.refresh_gate.lock().await;
        Ok(self.refresh_oauth_locked(endpoints, tokens).await?)
    }

    pub fn authorization_url(&self, params: &AuthorizationUrlParams) -> Result<Url, RestError> {
        match &self.state {
            AuthState::OAuth { endpoints, .. } => Ok(endpoints.authorization_url(params)),
            AuthState::ServiceAccount { .. } => Err(RestError::configuration(
                "Authorization URL is not applicable for service account authentication",
            )),
        }
    }

    /// Exchange an authorization code and adopt the resulting tokens.
    pub async fn authorize(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, RestError> {
        let AuthState::OAuth { endpoints, tokens } = &self.state else {
            return Err(RestError::configuration(
                "Authorization code grant is not applicable for service account authentication",
            ));
        };
        let _gate = self.refresh_gate.lock().await;

        let response = endpoints
            .exchange_authorization_code(code, redirect_uri)
            .await?;
        let current = read(tokens).clone();
        let pair = Arc::new(TokenPair {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map_or_else(|| current.refresh_token.clone(), |rt| rt.secret().clone()),
        });
        *write(tokens) = pair.clone();
        info!(
            auth_type = "oauth",
            "[Credentials] Authorization code exchanged for tokens"
        );
        self.notify_refresh(&pair);

        Ok(into_grant(&response)?)
    }

    async fn refresh_oauth_locked(
        &self,
        endpoints: &OauthEndpoints,
        tokens: &RwLock<Arc<TokenPair>>,
    ) -> Result<Arc<TokenPair>, AuthRefreshError> {
        let current = read(tokens).clone();
        if current.refresh_token.is_empty() {
            return Err(AuthRefreshError::MissingRefreshToken);
        }

        let response = endpoints
            .refresh_access_token(&current.refresh_token)
            .await?;
        let rotated = response.refresh_token().is_some();
        let pair = Arc::new(TokenPair {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map_or_else(|| current.refresh_token.clone(), |rt| rt.secret().clone()),
        });
        *write(tokens) = pair.clone();

        info!(
            auth_type = "oauth",
            rotated_refresh_token = rotated,
            expires_in = ?response.expires_in(),
            "[Credentials] Access token refreshed"
        );
        self.notify_refresh(&pair);
        Ok(pair)
    }

    fn notify_refresh(&self, pair: &TokenPair) {
        let callback = read(&self.on_refresh).clone();
        if let Some(callback) = callback {
            callback(&pair.access_token, &pair.refresh_token);
        }
    }
}

fn fresh_cached(cache: &RwLock<Option<CachedToken>>) -> Option<String> {
    read(cache)
        .as_ref()
        .filter(|c| c.is_fresh())
        .map(|c| c.access_token.clone())
}

async fn fetch_service_account_token(
    source: &dyn TokenSource,
    scopes: &BTreeSet<String>,
    cache: &RwLock<Option<CachedToken>>,
) -> Result<String, AuthRefreshError> {
    // A token the server just rejected must not be served again, even if the fetch fails.
    *write(cache) = None;

    let fetched = source.fetch_token(scopes).await?;
    let cached = CachedToken::from_fetched(fetched, Utc::now());
    let token = cached.access_token.clone();
    info!(
        auth_type = "service_account",
        expires_at = %cached.expires_at,
        "[Credentials] Service account token fetched"
    );
    *write(cache) = Some(cached);
    Ok(token)
}
