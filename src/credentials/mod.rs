mod endpoints;
mod manager;
mod service_account;

pub use endpoints::{AuthorizationUrlParams, OauthEndpoints};
pub use manager::{CredentialManager, RefreshCallback};
pub use service_account::{
    CachedToken, EXPIRY_BUFFER, FetchedToken, MetadataServerTokenSource, TokenSource,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Authentication mode, fixed for the lifetime of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[serde(rename = "oauth")]
    OAuth,
    ServiceAccount,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::OAuth => "oauth",
            AuthType::ServiceAccount => "service_account",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of these is active per client.
#[derive(Debug, Clone)]
pub enum Credential {
    OAuth(OAuthCredential),
    ServiceAccount(ServiceAccountCredential),
}

impl Credential {
    pub fn auth_type(&self) -> AuthType {
        match self {
            Credential::OAuth(_) => AuthType::OAuth,
            Credential::ServiceAccount(_) => AuthType::ServiceAccount,
        }
    }
}

/// User credential for the `authorization_code` / `refresh_token` grants.
#[derive(Clone, Default)]
pub struct OAuthCredential {
    /// May be empty; the first 401 then triggers a refresh.
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredential {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .finish()
    }
}

/// Non-interactive identity. The key material is opaque: whatever can mint a bearer token.
#[derive(Clone)]
pub struct ServiceAccountCredential {
    pub source: Arc<dyn TokenSource>,
    pub scopes: BTreeSet<String>,
    /// Optional warm start for the token cache.
    pub cached_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServiceAccountCredential {
    pub fn new<I, S>(source: Arc<dyn TokenSource>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            scopes: scopes.into_iter().map(Into::into).collect(),
            cached_token: None,
            expires_at: None,
        }
    }
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("scopes", &self.scopes)
            .field("cached_token", &self.cached_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the OAuth token pair. Swapped as a whole, never patched in place.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_secrets() {
        let cred = OAuthCredential::new("client-1", "shh", "ya29.a0", "1//refresh");
        let debug = format!("{cred:?}");
        assert!(debug.contains("client-1"));
        assert!(!debug.contains("shh"));
        assert!(!debug.contains("ya29.a0"));
        assert!(!debug.contains("1//refresh"));

        let pair = TokenPair {
            access_token: "ya29.a0".to_string(),
            refresh_token: String::new(),
        };
        assert_eq!(
            format!("{pair:?}"),
            r#"TokenPair { access_token: "<redacted>", refresh_token: "<empty>" }"#
        );
    }

    #[test]
    fn auth_type_names_match_wire_tags() {
        assert_eq!(AuthType::OAuth.to_string(), "oauth");
        assert_eq!(
            serde_json::to_value(AuthType::ServiceAccount).expect("serialize"),
            serde_json::json!("service_account")
        );
    }
}
