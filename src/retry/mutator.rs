use crate::credentials::CredentialManager;
use crate::error::AuthRefreshError;
use crate::http::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Produces the request to re-issue after an approved 401.
#[async_trait]
pub trait RequestMutator: Send + Sync {
    async fn mutate(
        &self,
        request: ApiRequest,
        response: &ApiResponse,
    ) -> Result<ApiRequest, AuthRefreshError>;
}

/// Refreshes the active credential and swaps the bearer token. Nothing else is touched.
///
/// A request without an issued token always forces a refresh.
#[derive(Debug, Clone)]
pub struct CredentialRefreshMutator {
    credentials: Arc<CredentialManager>,
}

impl CredentialRefreshMutator {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl RequestMutator for CredentialRefreshMutator {
    async fn mutate(
        &self,
        mut request: ApiRequest,
        response: &ApiResponse,
    ) -> Result<ApiRequest, AuthRefreshError> {
        // Compare against what the manager issued; callers may have overridden the header.
        let stale = request.issued_token().map(str::to_owned);
        let token = self.credentials.refresh(stale.as_deref()).await?;
        request
            .set_issued_bearer(&token)
            .map_err(|_| AuthRefreshError::InvalidToken)?;
        info!(
            auth_type = %self.credentials.auth_type(),
            status = %response.status,
            uri = %request.url,
            "[RestApi] Credentials refreshed after rejected request"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OauthConfig;
    use crate::credentials::{
        Credential, FetchedToken, ServiceAccountCredential, TokenSource,
    };
    use async_trait::async_trait;
    use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
    use reqwest::{Method, StatusCode};
    use std::collections::BTreeSet;
    use url::Url;

    struct FixedSource(&'static str);

    #[async_trait]
    impl TokenSource for FixedSource {
        async fn fetch_token(
            &self,
            _scopes: &BTreeSet<String>,
        ) -> Result<FetchedToken, AuthRefreshError> {
            Ok(FetchedToken {
                access_token: self.0.to_string(),
                expires_in: None,
            })
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        async fn fetch_token(
            &self,
            _scopes: &BTreeSet<String>,
        ) -> Result<FetchedToken, AuthRefreshError> {
            Err(AuthRefreshError::ServiceAccount {
                message: "key revoked".to_string(),
            })
        }
    }

    fn mutator(source: Arc<dyn TokenSource>) -> CredentialRefreshMutator {
        let manager = CredentialManager::new(
            Credential::ServiceAccount(ServiceAccountCredential::new(source, ["scope-a"])),
            &OauthConfig::default(),
            reqwest::Client::new(),
        )
        .expect("manager builds");
        CredentialRefreshMutator::new(Arc::new(manager))
    }

    fn request() -> ApiRequest {
        let mut req = ApiRequest::new(
            Method::PUT,
            Url::parse("https://www.googleapis.com/items/1").expect("url"),
        );
        req.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        req.headers
            .insert("x-goog-user-project", HeaderValue::from_static("proj-1"));
        req.set_bearer("stale").expect("token");
        req.body = Some(b"\x00binary\xffbody".to_vec());
        req
    }

    #[tokio::test]
    async fn only_authorization_changes() {
        let original = request();
        let unauthorized = ApiResponse::new(StatusCode::UNAUTHORIZED, Vec::new());
        let mutated = mutator(Arc::new(FixedSource("fresh")))
            .mutate(original.clone(), &unauthorized)
            .await
            .expect("refresh succeeds");

        assert_eq!(mutated.bearer_token(), Some("fresh"));
        assert_eq!(mutated.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(mutated.body, original.body);
        assert_eq!(mutated.method, original.method);
        assert_eq!(mutated.url, original.url);
        for (name, value) in &original.headers {
            if name != AUTHORIZATION {
                assert_eq!(mutated.headers.get(name), Some(value));
            }
        }
        assert_eq!(mutated.headers.len(), original.headers.len());
    }

    #[tokio::test]
    async fn refresh_failure_is_surfaced() {
        let unauthorized = ApiResponse::new(StatusCode::UNAUTHORIZED, Vec::new());
        let err = mutator(Arc::new(FailingSource))
            .mutate(request(), &unauthorized)
            .await
            .expect_err("refresh fails");
        assert!(matches!(err, AuthRefreshError::ServiceAccount { .. }));
    }
}
