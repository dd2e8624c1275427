use authrest::config::Config;
use authrest::{
    AuthRefreshError, AuthType, RestClient, RestError, RetryPolicy, ServiceAccountCredential,
    credentials::MetadataServerTokenSource,
};
use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone)]
struct CaptureState {
    reqs: Arc<Mutex<Vec<Captured>>>,
    issued: Arc<AtomicUsize>,
    metadata_status: Arc<AtomicU16>,
    lifetime_secs: Arc<AtomicU64>,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self {
            reqs: Arc::default(),
            issued: Arc::default(),
            metadata_status: Arc::new(AtomicU16::new(200)),
            lifetime_secs: Arc::new(AtomicU64::new(3600)),
        }
    }
}

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

impl CaptureState {
    fn captured(&self, path: &str) -> Vec<Captured> {
        self.reqs
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    fn push(&self, path: &str, query: Option<String>, headers: HeaderMap) {
        self.reqs.lock().unwrap().push(Captured {
            path: path.to_string(),
            query,
            headers,
        });
    }
}

async fn spawn_test_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let base = Url::parse(&format!("http://{}", addr)).expect("valid base url");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    base
}

async fn metadata_handler(
    State(state): State<CaptureState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    state.push("/token", query, headers);

    let status = StatusCode::from_u16(state.metadata_status.load(Ordering::SeqCst)).unwrap();
    if !status.is_success() {
        return (status, "metadata unavailable").into_response();
    }
    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("sa-token-{n}"),
        "expires_in": state.lifetime_secs.load(Ordering::SeqCst),
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn ok_handler(State(state): State<CaptureState>, headers: HeaderMap) -> StatusCode {
    state.push("/ok", None, headers);
    StatusCode::OK
}

/// Rejects the first token the metadata server ever issued.
async fn picky_handler(State(state): State<CaptureState>, headers: HeaderMap) -> StatusCode {
    let revoked = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|v| v == "Bearer sa-token-1");
    state.push("/picky", None, headers);
    if revoked {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    }
}

async fn mock_server(state: &CaptureState) -> Url {
    let mock = Router::new()
        .route("/token", get(metadata_handler))
        .route("/ok", get(ok_handler))
        .route("/picky", get(picky_handler))
        .with_state(state.clone());
    spawn_test_server(mock).await
}

fn config(base: &Url, scopes: &[&str]) -> Config {
    let mut cfg = Config::default();
    cfg.http.api_url = base.clone();
    cfg.service_account.metadata_url = base.join("/token").expect("metadata url");
    cfg.service_account.scopes = scopes.iter().map(ToString::to_string).collect();
    cfg
}

async fn client(state: &CaptureState, scopes: &[&str]) -> RestClient {
    let base = mock_server(state).await;
    RestClient::builder(config(&base, scopes))
        .service_account_from_config()
        .retry_policy(RetryPolicy::default().with_delay(|_: u32| Duration::ZERO))
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn metadata_token_is_fetched_once_and_reused() {
    let state = CaptureState::default();
    let client = client(
        &state,
        &[
            "https://www.googleapis.com/auth/devstorage.read_only",
            "https://www.googleapis.com/auth/cloud-platform",
        ],
    )
    .await;
    assert_eq!(client.auth_type(), AuthType::ServiceAccount);

    client.get("/ok").await.expect("first call");
    client.get("/ok").await.expect("second call");

    let fetches = state.captured("/token");
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].headers["metadata-flavor"], "Google");
    let query: Vec<(String, String)> =
        url::form_urlencoded::parse(fetches[0].query.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    assert_eq!(
        query,
        [(
            "scopes".to_string(),
            "https://www.googleapis.com/auth/cloud-platform,https://www.googleapis.com/auth/devstorage.read_only"
                .to_string()
        )]
    );

    for call in state.captured("/ok") {
        assert_eq!(call.headers[header::AUTHORIZATION], "Bearer sa-token-1");
    }
}

#[tokio::test]
async fn rejected_token_is_dropped_and_refetched() {
    let state = CaptureState::default();
    let client = client(&state, &["scope-a"]).await;

    client.get("/picky").await.expect("succeeds with a new token");

    let calls = state.captured("/picky");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].headers[header::AUTHORIZATION], "Bearer sa-token-1");
    assert_eq!(calls[1].headers[header::AUTHORIZATION], "Bearer sa-token-2");
    assert_eq!(state.captured("/token").len(), 2);
    assert_eq!(client.access_token().await.expect("cached"), "sa-token-2");
}

#[tokio::test]
async fn token_inside_expiry_buffer_is_never_served() {
    let state = CaptureState::default();
    state.lifetime_secs.store(45, Ordering::SeqCst);
    let client = client(&state, &["scope-a"]).await;

    client.get("/ok").await.expect("first call");
    client.get("/ok").await.expect("second call");

    assert_eq!(state.captured("/token").len(), 2);
    let calls = state.captured("/ok");
    assert_eq!(calls[1].headers[header::AUTHORIZATION], "Bearer sa-token-2");
}

#[tokio::test]
async fn metadata_failure_is_an_auth_refresh_error() {
    let state = CaptureState::default();
    state.metadata_status.store(500, Ordering::SeqCst);
    let client = client(&state, &["scope-a"]).await;

    let err = client.get("/ok").await.expect_err("no token available");
    match err {
        RestError::AuthRefresh(AuthRefreshError::ServiceAccount { message }) => {
            assert!(message.contains("500"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(state.captured("/ok").is_empty());
}

#[tokio::test]
async fn warm_cache_skips_the_metadata_server() {
    let state = CaptureState::default();
    let base = mock_server(&state).await;
    let cfg = config(&base, &["scope-a"]);

    let source = MetadataServerTokenSource::new(
        reqwest::Client::new(),
        cfg.service_account.metadata_url.clone(),
    );
    let mut credential = ServiceAccountCredential::new(Arc::new(source), ["scope-a"]);
    credential.cached_token = Some("persisted-token".to_string());
    credential.expires_at = Some(Utc::now() + TimeDelta::minutes(30));
    let client = RestClient::with_service_account(cfg, credential).expect("client builds");

    client.get("/ok").await.expect("served from cache");
    assert!(state.captured("/token").is_empty());
    assert_eq!(
        state.captured("/ok")[0].headers[header::AUTHORIZATION],
        "Bearer persisted-token"
    );
}

#[tokio::test]
async fn service_account_needs_scopes_and_rejects_oauth_operations() {
    let state = CaptureState::default();
    let base = mock_server(&state).await;

    let err = RestClient::builder(config(&base, &[]))
        .service_account_from_config()
        .build()
        .expect_err("scopes are required");
    assert_eq!(
        err.to_string(),
        "Configuration error: Service account configuration and scopes are required"
    );

    let client = client(&state, &["scope-a"]).await;
    let err = client.refresh_token().await.expect_err("not applicable");
    assert_eq!(
        err.to_string(),
        "Configuration error: Refresh token is not applicable for service account authentication"
    );
    assert!(client.token_pair().is_none());
    assert!(client.set_credentials("a", "b").is_err());
    assert!(state.captured("/token").is_empty());
}
