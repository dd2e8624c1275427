use serde::{Deserialize, Serialize};
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";

/// OAuth client configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OauthConfig {
    /// Consent screen endpoint used by the authorization URL builder.
    /// TOML: `oauth.auth_url`. Default: Google's v2 auth endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: Url,

    /// Token endpoint for the `authorization_code` and `refresh_token` grants.
    /// TOML: `oauth.token_url`. Default: `https://www.googleapis.com/oauth2/v4/token`.
    #[serde(default = "default_token_url")]
    pub token_url: Url,

    /// TOML: `oauth.client_id`. Env: `AUTHREST_OAUTH__CLIENT_ID`.
    #[serde(default)]
    pub client_id: String,

    /// TOML: `oauth.client_secret`. Env: `AUTHREST_OAUTH__CLIENT_SECRET`.
    #[serde(default)]
    pub client_secret: String,

    /// Optional starting access token. Empty means "obtain one through the first 401 refresh".
    #[serde(default)]
    pub access_token: String,

    /// Long-lived refresh token. Env: `AUTHREST_OAUTH__REFRESH_TOKEN`.
    #[serde(default)]
    pub refresh_token: String,
}

impl Default for OauthConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
        }
    }
}

fn default_auth_url() -> Url {
    Url::parse(GOOGLE_AUTH_URL).expect("default auth url is valid")
}

fn default_token_url() -> Url {
    Url::parse(GOOGLE_TOKEN_URL).expect("default token url is valid")
}
