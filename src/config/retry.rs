use serde::{Deserialize, Serialize};

/// Retry/backoff configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Max retries per exchange (not counting the first attempt).
    /// TOML: `retry.max_attempts`. Default: `7`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay of the exponential backoff, in milliseconds.
    /// TOML: `retry.base_delay_ms`. Default: `500`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the uniform jitter added to every delay, in milliseconds.
    /// TOML: `retry.max_jitter_ms`. Default: `250`.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Cap on the exponential part of the delay, in milliseconds.
    /// TOML: `retry.max_delay_ms`. Default: `60000`.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// When set, a 400 whose body contains this marker is retried.
    /// TOML: `retry.bad_request_marker`. Example: `"Unknown metric"`.
    #[serde(default)]
    pub bad_request_marker: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            max_delay_ms: default_max_delay_ms(),
            bad_request_marker: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_jitter_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    60_000
}
