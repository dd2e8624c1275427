use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com";

/// Transport configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Base URL that relative request paths are joined onto.
    /// TOML: `http.api_url`. Default: `https://www.googleapis.com`.
    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// Optional upstream HTTP proxy. If set, used for reqwest clients.
    /// TOML: `http.proxy`. Example: `http://127.0.0.1:1080`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// TCP connect timeout in seconds.
    /// TOML: `http.connect_timeout_secs`. Default: `30`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds. A timeout is handled like any other network failure.
    /// TOML: `http.request_timeout_secs`. Default: `300`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Allow HTTP/2 multiplexing for reqwest clients; disabled forces HTTP/1.
    /// TOML: `http.enable_multiplexing`. Default: `true`.
    #[serde(default = "default_enable_multiplexing")]
    pub enable_multiplexing: bool,

    /// User-Agent sent on every request.
    /// TOML: `http.user_agent`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            proxy: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            enable_multiplexing: default_enable_multiplexing(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default API url is valid")
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    5 * 60
}

fn default_enable_multiplexing() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("authrest/{}", env!("CARGO_PKG_VERSION"))
}
