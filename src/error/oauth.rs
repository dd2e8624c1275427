use super::IsRetryable;
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum OauthError {
    #[error("OAuth2 request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OAuth2 server response error: {error}")]
    ServerResponse {
        error: String,
        description: Option<String>,
    },

    #[error("OAuth2 token endpoint parse error: {message}. Body: {body}")]
    Parse { message: String, body: String },

    #[error("OAuth2 unexpected error: {message}")]
    Other { message: String },
}

/// Only transport failures are retried against the token endpoint; any answer from the
/// endpoint itself is final.
impl IsRetryable for OauthError {
    fn is_retryable(&self) -> bool {
        match self {
            OauthError::Request(e) => !e.is_builder(),
            _ => false,
        }
    }
}

type PkgsRequestTokenError = RequestTokenError<
    HttpClientError<ReqwestClientError>,
    StandardErrorResponse<BasicErrorResponseType>,
>;

impl From<PkgsRequestTokenError> for OauthError {
    fn from(e: PkgsRequestTokenError) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => OauthError::ServerResponse {
                error: err.error().to_string(),
                description: err.error_description().cloned(),
            },
            RequestTokenError::Request(wrapper) => match wrapper {
                oauth2::HttpClientError::Reqwest(real_err) => OauthError::Request(*real_err),
                other => OauthError::Other {
                    message: format!("HttpClientError: {other:?}"),
                },
            },
            RequestTokenError::Parse(parse_err, body) => {
                let body_str = String::from_utf8_lossy(&body);
                let body = body_str
                    .char_indices()
                    .nth(100)
                    .map_or_else(
                        || body_str.clone().into_owned(),
                        |(idx, _)| format!("{}...<truncated>", &body_str[..idx]),
                    );
                OauthError::Parse {
                    message: parse_err.to_string(),
                    body,
                }
            }
            RequestTokenError::Other(s) => OauthError::Other { message: s },
        }
    }
}

/// Token refresh (or service-account re-fetch) failed. Always terminal for the exchange
/// that triggered it.
#[derive(Debug, ThisError)]
pub enum AuthRefreshError {
    #[error("OAuth token refresh failed: {0}")]
    Oauth(#[from] OauthError),

    #[error("Service account token fetch failed: {message}")]
    ServiceAccount { message: String },

    #[error("Refresh token is not set")]
    MissingRefreshToken,

    #[error("Token endpoint returned a token that is not a valid header value")]
    InvalidToken,
}

impl From<PkgsRequestTokenError> for AuthRefreshError {
    fn from(e: PkgsRequestTokenError) -> Self {
        OauthError::from(e).into()
    }
}
