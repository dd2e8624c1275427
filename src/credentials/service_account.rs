use crate::error::AuthRefreshError;
use async_trait::async_trait;
use authrest_schema::MetadataToken;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::HeaderValue;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A cached service-account token is replaced once it is this close to expiry.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token source does not report one.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

/// Opaque "mint a bearer token" capability backing a service account.
///
/// JWT signing, key files and workload identity all live behind this trait.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self, scopes: &BTreeSet<String>)
    -> Result<FetchedToken, AuthRefreshError>;
}

#[derive(Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    pub fn from_fetched(token: FetchedToken, now: DateTime<Utc>) -> Self {
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let lifetime = TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::MAX);
        Self {
            access_token: token.access_token,
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// True while `now` is more than [`EXPIRY_BUFFER`] away from expiry.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let buffer = TimeDelta::from_std(EXPIRY_BUFFER).unwrap_or(TimeDelta::zero());
        now < self.expires_at - buffer
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Token source backed by the compute metadata server of the attached service account.
#[derive(Debug, Clone)]
pub struct MetadataServerTokenSource {
    http: reqwest::Client,
    token_url: Url,
}

impl MetadataServerTokenSource {
    pub fn new(http: reqwest::Client, token_url: Url) -> Self {
        Self { http, token_url }
    }
}

#[async_trait]
impl TokenSource for MetadataServerTokenSource {
    async fn fetch_token(
        &self,
        scopes: &BTreeSet<String>,
    ) -> Result<FetchedToken, AuthRefreshError> {
        let mut url = self.token_url.clone();
        if !scopes.is_empty() {
            let joined = scopes.iter().map(String::as_str).collect::<Vec<_>>().join(",");
            url.query_pairs_mut().append_pair("scopes", &joined);
        }

        let resp = self
            .http
            .get(url)
            .header("Metadata-Flavor", HeaderValue::from_static("Google"))
            .send()
            .await
            .map_err(|e| AuthRefreshError::ServiceAccount {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AuthRefreshError::ServiceAccount {
                message: format!("metadata server returned status {status}"),
            });
        }

        let token: MetadataToken =
            resp.json()
                .await
                .map_err(|e| AuthRefreshError::ServiceAccount {
                    message: format!("invalid metadata token payload: {e}"),
                })?;
        debug!(
            expires_in = ?token.expires_in,
            "[ServiceAccount] Metadata server issued access token"
        );

        Ok(FetchedToken {
            access_token: token.access_token,
            expires_in: token.expires_in.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(secs: u64) -> FetchedToken {
        FetchedToken {
            access_token: "sa-token".to_string(),
            expires_in: Some(Duration::from_secs(secs)),
        }
    }

    #[test]
    fn token_is_fresh_until_the_buffer_starts() {
        let now = Utc::now();
        let cached = CachedToken::from_fetched(fetched(3600), now);

        assert!(cached.is_fresh_at(now));
        assert!(cached.is_fresh_at(now + TimeDelta::seconds(3539)));
        assert!(!cached.is_fresh_at(now + TimeDelta::seconds(3540)));
        assert!(!cached.is_fresh_at(now + TimeDelta::seconds(4000)));
    }

    #[test]
    fn short_lived_token_is_never_fresh() {
        let now = Utc::now();
        let cached = CachedToken::from_fetched(fetched(30), now);
        assert!(!cached.is_fresh_at(now));
    }

    #[test]
    fn missing_lifetime_defaults_to_one_hour() {
        let now = Utc::now();
        let cached = CachedToken::from_fetched(
            FetchedToken {
                access_token: "sa-token".to_string(),
                expires_in: None,
            },
            now,
        );
        assert_eq!(cached.expires_at, now + TimeDelta::seconds(3600));
    }
}
