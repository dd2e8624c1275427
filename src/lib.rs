pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
mod oauth_utils;
pub mod retry;
pub mod utils;

pub use authrest_schema::{RetryEvent, TokenGrant};
pub use client::{RequestBody, RestClient, RestClientBuilder};
pub use credentials::{
    AuthType, AuthorizationUrlParams, Credential, CredentialManager, OAuthCredential,
    ServiceAccountCredential, TokenPair, TokenSource,
};
pub use error::{AuthRefreshError, RestError};
pub use http::{ApiRequest, ApiResponse, HttpTransport};
pub use retry::{DelayPolicy, RetryPolicy};
pub use utils::logging::{MemoryRetrySink, RetryEventSink, TracingRetrySink};
