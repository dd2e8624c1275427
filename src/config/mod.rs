mod basic;
mod http;
mod oauth;
mod retry;
mod service_account;

pub use basic::BasicConfig;
pub use http::HttpConfig;
pub use oauth::OauthConfig;
pub use retry::RetryConfig;
pub use service_account::ServiceAccountConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Logging (see `basic` table in authrest.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Transport and API base URL (see `http` table).
    #[serde(default)]
    pub http: HttpConfig,

    /// OAuth endpoints and client credentials (see `oauth` table).
    #[serde(default)]
    pub oauth: OauthConfig,

    /// Retry/backoff tuning (see `retry` table).
    #[serde(default)]
    pub retry: RetryConfig,

    /// Service-account token source (see `service_account` table).
    #[serde(default)]
    pub service_account: ServiceAccountConfig,
}

pub const DEFAULT_CONFIG_FILE: &str = "authrest.toml";
pub const ENV_PREFIX: &str = "AUTHREST_";

impl Config {
    /// Builds a Figment that merges defaults, an optional TOML file and `AUTHREST_*` env vars.
    ///
    /// Nested keys use a double underscore: `AUTHREST_RETRY__MAX_ATTEMPTS=3`.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        let path = path.as_ref();
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = if path.is_file() {
            figment.merge(Toml::file(path))
        } else {
            figment
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration from `path` (if present) layered over defaults and under env vars.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.basic.loglevel, "info");
        assert_eq!(cfg.retry.max_attempts, 7);
        assert_eq!(cfg.http.api_url.as_str(), "https://www.googleapis.com/");
        assert_eq!(cfg.http.connect_timeout_secs, 30);
        assert_eq!(cfg.http.request_timeout_secs, 300);
        assert_eq!(
            cfg.oauth.token_url.as_str(),
            "https://www.googleapis.com/oauth2/v4/token"
        );
    }

    #[test]
    fn toml_overrides_defaults_and_keeps_the_rest() {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(
                r#"
                [retry]
                max_attempts = 2
                bad_request_marker = "Unknown metric"

                [oauth]
                client_id = "client-1"
                "#,
            ));
        let cfg: Config = figment.extract().expect("extract config");

        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(
            cfg.retry.bad_request_marker.as_deref(),
            Some("Unknown metric")
        );
        assert_eq!(cfg.oauth.client_id, "client-1");
        assert_eq!(cfg.oauth.client_secret, "");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("definitely-not-here.toml").expect("defaults load");
        assert_eq!(cfg.retry.max_attempts, 7);
    }
}
