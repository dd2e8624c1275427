mod oauth;
mod rest;

pub use oauth::{AuthRefreshError, OauthError};
pub use rest::{RestError, TransportError};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
