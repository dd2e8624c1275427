//! Retry pipeline around one logical HTTP exchange.
//!
//! [`RetryMiddleware`] drives the loop: it asks a [`RetryDecider`] after every attempt, waits
//! according to a [`DelayPolicy`], and lets a [`RequestMutator`] swap credentials on 401.

mod decider;
mod delay;
mod middleware;
mod mutator;

pub use decider::{RetryDecider, StatusRetryDecider};
pub use delay::{DelayPolicy, ExponentialJitter};
pub use middleware::RetryMiddleware;
pub use mutator::{CredentialRefreshMutator, RequestMutator};

use crate::config::RetryConfig;
use crate::error::TransportError;
use crate::http::{ApiRequest, ApiResponse};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;

/// Body marker of the provider quirk where a 400 is transient.
pub const UNKNOWN_METRIC_MARKER: &str = "Unknown metric";

/// Reason phrase that earns a second 401 one more attempt.
pub const SERVICE_UNAVAILABLE_REASON: &str = "Service Unavailable";

/// Per-status override: `true` approves a retry.
pub type ResponseHook = Arc<dyn Fn(&ApiResponse) -> bool + Send + Sync>;

/// Retry limits, delay and status hooks for one client.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries per exchange, not counting the first attempt.
    pub max_attempts: u32,
    pub delay: Arc<dyn DelayPolicy>,
    /// Consulted on 403. Default approves.
    pub forbidden_hook: ResponseHook,
    /// Consulted on 400. Default declines.
    pub bad_request_hook: ResponseHook,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Arc::new(ExponentialJitter::default()),
            forbidden_hook: Arc::new(|_: &ApiResponse| true),
            bad_request_hook: Arc::new(|_: &ApiResponse| false),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        let delay = ExponentialJitter::new(
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_millis(cfg.max_jitter_ms),
            Duration::from_millis(cfg.max_delay_ms),
        );
        let mut policy = Self::default()
            .with_max_attempts(cfg.max_attempts)
            .with_delay(delay);
        if let Some(marker) = cfg.bad_request_marker.as_deref() {
            policy.bad_request_hook = body_marker_hook(marker);
        }
        policy
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: impl DelayPolicy + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    #[must_use]
    pub fn with_forbidden_hook(
        mut self,
        hook: impl Fn(&ApiResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.forbidden_hook = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn with_bad_request_hook(
        mut self,
        hook: impl Fn(&ApiResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.bad_request_hook = Arc::new(hook);
        self
    }
}

/// Hook approving responses whose body contains `marker`.
pub fn body_marker_hook(marker: impl Into<String>) -> ResponseHook {
    let marker = marker.into();
    Arc::new(move |response: &ApiResponse| response.text().contains(marker.as_str()))
}

/// Result of one transport call.
#[derive(Debug)]
pub enum AttemptOutcome {
    Response(ApiResponse),
    Transport(TransportError),
}

impl AttemptOutcome {
    fn is_unauthorized(&self) -> bool {
        matches!(self, AttemptOutcome::Response(r) if r.status == StatusCode::UNAUTHORIZED)
    }
}

/// State of one exchange, created per top-level call once the first attempt completes.
#[derive(Debug)]
pub struct RetryContext {
    /// Retries already performed.
    pub attempt: u32,
    pub request: ApiRequest,
    pub outcome: AttemptOutcome,
    /// 401 responses seen so far, including the current one.
    pub unauthorized_count: u32,
}

impl RetryContext {
    pub fn new(request: ApiRequest, outcome: AttemptOutcome) -> Self {
        Self {
            attempt: 0,
            request,
            unauthorized_count: u32::from(outcome.is_unauthorized()),
            outcome,
        }
    }

    /// Replace the latest outcome.
    pub fn record(&mut self, outcome: AttemptOutcome) {
        self.unauthorized_count += u32::from(outcome.is_unauthorized());
        self.outcome = outcome;
    }

    pub fn response(&self) -> Option<&ApiResponse> {
        match &self.outcome {
            AttemptOutcome::Response(response) => Some(response),
            AttemptOutcome::Transport(_) => None,
        }
    }

    pub fn into_outcome(self) -> Result<ApiResponse, TransportError> {
        match self.outcome {
            AttemptOutcome::Response(response) => Ok(response),
            AttemptOutcome::Transport(err) => Err(err),
        }
    }
}
