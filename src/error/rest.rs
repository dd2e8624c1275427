use super::IsRetryable;
use super::oauth::AuthRefreshError;
use crate::http::ApiResponse;
use reqwest::StatusCode;
use thiserror::Error as ThisError;

/// Failure below HTTP: nothing came back to inspect.
#[derive(Debug, ThisError)]
pub enum TransportError {
    /// DNS, connect, TLS, timeouts, body read failures.
    #[error("HTTP transport error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            // A request that could not be built will not build on the next attempt either.
            TransportError::Reqwest(e) => !e.is_builder(),
            TransportError::Io(_) => true,
        }
    }
}

/// Terminal outcome of a [`crate::RestClient`] call.
#[derive(Debug, ThisError)]
pub enum RestError {
    #[error("Network error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server error with status: {}", .0.status)]
    Server(Box<ApiResponse>),

    #[error("Unauthorized with status: {}", .0.status)]
    Unauthorized(Box<ApiResponse>),

    #[error("Forbidden with status: {}", .0.status)]
    Forbidden(Box<ApiResponse>),

    #[error("Client request error with status: {}", .0.status)]
    ClientRequest(Box<ApiResponse>),

    #[error("Unexpected status: {}", .0.status)]
    UnexpectedStatus(Box<ApiResponse>),

    #[error(transparent)]
    AuthRefresh(#[from] AuthRefreshError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl RestError {
    /// Pass a 2xx response through; classify anything else into the error taxonomy.
    pub fn check_status(response: ApiResponse) -> Result<ApiResponse, RestError> {
        let status = response.status;
        if status.is_success() {
            return Ok(response);
        }

        let response = Box::new(response);
        Err(match status {
            StatusCode::UNAUTHORIZED => RestError::Unauthorized(response),
            StatusCode::FORBIDDEN => RestError::Forbidden(response),
            StatusCode::TOO_MANY_REQUESTS => RestError::Server(response),
            s if s.is_server_error() => RestError::Server(response),
            s if s.is_client_error() => RestError::ClientRequest(response),
            _ => RestError::UnexpectedStatus(response),
        })
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RestError::Configuration(message.into())
    }

    /// The final buffered response, for status errors.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            RestError::Server(r)
            | RestError::Unauthorized(r)
            | RestError::Forbidden(r)
            | RestError::ClientRequest(r)
            | RestError::UnexpectedStatus(r) => Some(r),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }
}
