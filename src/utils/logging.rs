use crate::http::{ApiRequest, ApiResponse};
use authrest_schema::{LoggedRequest, LoggedResponse, REDACTED_HEADER_VALUE, RetryEvent};
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub(crate) fn with_pretty_json_debug<T, F>(value: &T, log_action: F)
where
    T: Serialize,
    F: FnOnce(&str),
{
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let pretty_json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|error| format!("<pretty serialize failed: {error}>"));
    log_action(pretty_json.as_str());
}

/// Receives one [`RetryEvent`] per approved retry, before the retry happens.
pub trait RetryEventSink: Send + Sync {
    fn record(&self, event: &RetryEvent);
}

/// Default sink: one INFO line per retry, full event dump at DEBUG.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetrySink;

impl RetryEventSink for TracingRetrySink {
    fn record(&self, event: &RetryEvent) {
        info!(
            uri = %event.request.uri,
            method = %event.request.method,
            status = event.response.as_ref().map(|r| r.status_code),
            "[RestApi] {}",
            event.message
        );
        with_pretty_json_debug(event, |pretty| {
            debug!(event = %pretty, "[RestApi] Retry event");
        });
    }
}

/// Sink that keeps every event in memory. Used by tests and by callers that want to
/// inspect the retry history of a client.
#[derive(Debug, Clone, Default)]
pub struct MemoryRetrySink {
    events: Arc<Mutex<Vec<RetryEvent>>>,
}

impl MemoryRetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RetryEventSink for MemoryRetrySink {
    fn record(&self, event: &RetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Build the audit record for a retry of `request`. The `Authorization` value is masked.
pub(crate) fn retry_event(
    attempt: u32,
    request: &ApiRequest,
    response: Option<&ApiResponse>,
) -> RetryEvent {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &request.headers {
        let value = if name == AUTHORIZATION {
            REDACTED_HEADER_VALUE.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert(value);
    }

    RetryEvent {
        message: RetryEvent::retry_message(attempt, response.map(|r| r.reason.as_str())),
        request: LoggedRequest {
            uri: request.url.to_string(),
            headers,
            method: request.method.to_string(),
            body: request.body_text().into_owned(),
        },
        response: response.map(|r| LoggedResponse {
            status_code: r.status.as_u16(),
            reason: r.reason.clone(),
            body: r.text().into_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{ACCEPT, HeaderValue};
    use reqwest::{Method, StatusCode};
    use url::Url;

    fn request() -> ApiRequest {
        let mut req = ApiRequest::new(
            Method::POST,
            Url::parse("https://www.googleapis.com/upload").expect("url"),
        );
        req.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        req.set_bearer("ya29.secret").expect("valid token");
        req.body = Some(br#"{"a":1}"#.to_vec());
        req
    }

    #[test]
    fn authorization_is_masked() {
        let event = retry_event(0, &request(), None);
        assert_eq!(event.request.headers["authorization"], "*****");
        assert_eq!(event.request.headers["accept"], "application/json");
        assert!(!serde_json::to_string(&event).expect("json").contains("ya29.secret"));
    }

    #[test]
    fn transport_failure_has_no_reason_suffix() {
        let event = retry_event(2, &request(), None);
        assert_eq!(event.message, "Retrying request (2x)");
        assert!(event.response.is_none());
        assert_eq!(event.request.method, "POST");
        assert_eq!(event.request.body, r#"{"a":1}"#);
    }

    #[test]
    fn response_reason_lands_in_message_and_payload() {
        let response = ApiResponse::new(StatusCode::SERVICE_UNAVAILABLE, b"later".to_vec());
        let event = retry_event(1, &request(), Some(&response));
        assert_eq!(
            event.message,
            "Retrying request (1x) - reason: Service Unavailable"
        );
        let logged = event.response.expect("response logged");
        assert_eq!(logged.status_code, 503);
        assert_eq!(logged.body, "later");
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryRetrySink::new();
        sink.record(&retry_event(0, &request(), None));
        sink.record(&retry_event(1, &request(), None));
        let messages: Vec<_> = sink.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["Retrying request (0x)", "Retrying request (1x)"]);
    }
}
