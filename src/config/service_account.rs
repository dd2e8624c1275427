use serde::{Deserialize, Serialize};
use url::Url;

pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Service-account configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceAccountConfig {
    /// Metadata server token endpoint of the attached service account.
    /// TOML: `service_account.metadata_url`.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: Url,

    /// OAuth scopes requested for the service account token (required in service-account mode).
    /// TOML: `service_account.scopes`.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for ServiceAccountConfig {
    fn default() -> Self {
        Self {
            metadata_url: default_metadata_url(),
            scopes: default_scopes(),
        }
    }
}

fn default_metadata_url() -> Url {
    Url::parse(METADATA_TOKEN_URL).expect("default metadata url is valid")
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/cloud-platform".to_string()]
}
