use super::{AttemptOutcome, ResponseHook, RetryContext, RetryPolicy, SERVICE_UNAVAILABLE_REASON};
use crate::error::IsRetryable;
use crate::utils::logging::{RetryEventSink, TracingRetrySink, retry_event};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;

/// Retry-or-stop verdict for the latest attempt of an exchange.
pub trait RetryDecider: Send + Sync {
    fn should_retry(&self, ctx: &RetryContext) -> bool;
}

/// Status-code policy. Every approved retry is reported to the sink first.
pub struct StatusRetryDecider {
    max_attempts: u32,
    forbidden_hook: ResponseHook,
    bad_request_hook: ResponseHook,
    sink: Arc<dyn RetryEventSink>,
}

impl StatusRetryDecider {
    pub fn new(policy: &RetryPolicy, sink: Arc<dyn RetryEventSink>) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            forbidden_hook: policy.forbidden_hook.clone(),
            bad_request_hook: policy.bad_request_hook.clone(),
            sink,
        }
    }

    pub fn with_tracing(policy: &RetryPolicy) -> Self {
        Self::new(policy, Arc::new(TracingRetrySink))
    }

    fn verdict(&self, ctx: &RetryContext) -> bool {
        if ctx.attempt >= self.max_attempts {
            debug!(
                attempt = ctx.attempt,
                max_attempts = self.max_attempts,
                "[RestApi] Retry budget exhausted"
            );
            return false;
        }

        let response = match &ctx.outcome {
            AttemptOutcome::Transport(err) => return err.is_retryable(),
            AttemptOutcome::Response(response) => response,
        };

        match response.status {
            s if s.is_success() => false,
            StatusCode::BAD_REQUEST => (self.bad_request_hook)(response),
            StatusCode::UNAUTHORIZED => {
                // First 401 buys a refresh; a second one only if the server blamed itself.
                let allowed = 1 + u32::from(response.reason == SERVICE_UNAVAILABLE_REASON);
                ctx.unauthorized_count <= allowed
            }
            StatusCode::FORBIDDEN => (self.forbidden_hook)(response),
            StatusCode::TOO_MANY_REQUESTS => true,
            s if s.is_server_error() => true,
            _ => false,
        }
    }
}

impl RetryDecider for StatusRetryDecider {
    fn should_retry(&self, ctx: &RetryContext) -> bool {
        let retry = self.verdict(ctx);
        if retry {
            self.sink
                .record(&retry_event(ctx.attempt, &ctx.request, ctx.response()));
        }
        retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::{ApiRequest, ApiResponse};
    use crate::utils::logging::MemoryRetrySink;
    use reqwest::Method;
    use url::Url;

    fn decider(policy: &RetryPolicy) -> (MemoryRetrySink, StatusRetryDecider) {
        let sink = MemoryRetrySink::new();
        let decider = StatusRetryDecider::new(policy, Arc::new(sink.clone()));
        (sink, decider)
    }

    fn ctx_with(attempt: u32, response: ApiResponse) -> RetryContext {
        let mut ctx = RetryContext::new(
            ApiRequest::new(
                Method::GET,
                Url::parse("https://www.googleapis.com/resource").expect("url"),
            ),
            AttemptOutcome::Response(response),
        );
        ctx.attempt = attempt;
        ctx
    }

    fn status(code: u16) -> ApiResponse {
        ApiResponse::new(StatusCode::from_u16(code).expect("valid status"), Vec::new())
    }

    #[test]
    fn exhausted_budget_stops_regardless_of_status() {
        let (sink, decider) = decider(&RetryPolicy::default().with_max_attempts(3));
        for code in [200, 400, 401, 403, 429, 500, 503] {
            for attempt in 3..6 {
                assert!(!decider.should_retry(&ctx_with(attempt, status(code))));
            }
        }
        assert!(sink.events().is_empty());
    }

    #[test]
    fn success_never_retries() {
        let (_, decider) = decider(&RetryPolicy::default());
        for attempt in 0..7 {
            assert!(!decider.should_retry(&ctx_with(attempt, status(200))));
            assert!(!decider.should_retry(&ctx_with(attempt, status(204))));
        }
    }

    #[test]
    fn status_table() {
        let (_, decider) = decider(&RetryPolicy::default());
        let retried = |code| decider.should_retry(&ctx_with(0, status(code)));

        assert!(retried(401));
        assert!(retried(403));
        assert!(retried(429));
        assert!(retried(500));
        assert!(retried(502));
        assert!(retried(503));
        assert!(!retried(400));
        assert!(!retried(404));
        assert!(!retried(409));
        assert!(!retried(301));
        assert!(!retried(100));
    }

    #[test]
    fn second_unauthorized_stops() {
        let (_, decider) = decider(&RetryPolicy::default());
        let mut ctx = ctx_with(0, status(401));
        assert!(decider.should_retry(&ctx));

        ctx.attempt = 1;
        ctx.record(AttemptOutcome::Response(status(401)));
        assert!(!decider.should_retry(&ctx));
    }

    #[test]
    fn service_unavailable_grants_one_extra_unauthorized_attempt() {
        let (_, decider) = decider(&RetryPolicy::default());
        let unavailable = || status(401).with_reason("Service Unavailable");

        let mut ctx = ctx_with(0, status(401));
        assert!(decider.should_retry(&ctx));
        ctx.attempt = 1;
        ctx.record(AttemptOutcome::Response(unavailable()));
        assert!(decider.should_retry(&ctx));
        ctx.attempt = 2;
        ctx.record(AttemptOutcome::Response(unavailable()));
        assert!(!decider.should_retry(&ctx));
    }

    #[test]
    fn hooks_decide_400_and_403() {
        let policy = RetryPolicy::default()
            .with_forbidden_hook(|_| false)
            .with_bad_request_hook(|r| r.text().contains("Unknown metric"));
        let (_, decider) = decider(&policy);

        assert!(!decider.should_retry(&ctx_with(0, status(403))));
        assert!(!decider.should_retry(&ctx_with(0, status(400))));
        assert!(decider.should_retry(&ctx_with(
            0,
            ApiResponse::new(StatusCode::BAD_REQUEST, b"Unknown metric: x".to_vec())
        )));
    }

    #[test]
    fn transport_errors_retry_and_log_without_reason() {
        let (sink, decider) = decider(&RetryPolicy::default());
        let mut ctx = ctx_with(0, status(200));
        ctx.attempt = 4;
        ctx.record(AttemptOutcome::Transport(TransportError::Io(
            std::io::Error::from(std::io::ErrorKind::TimedOut),
        )));

        assert!(decider.should_retry(&ctx));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Retrying request (4x)");
        assert!(events[0].response.is_none());
    }

    #[test]
    fn only_approved_retries_are_logged() {
        let (sink, decider) = decider(&RetryPolicy::default());
        decider.should_retry(&ctx_with(0, status(404)));
        decider.should_retry(&ctx_with(0, status(200)));
        decider.should_retry(&ctx_with(1, status(503)));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].message,
            "Retrying request (1x) - reason: Service Unavailable"
        );
    }
}
