use super::{AttemptOutcome, DelayPolicy, RequestMutator, RetryContext, RetryDecider};
use crate::error::RestError;
use crate::http::{ApiRequest, ApiResponse, HttpTransport};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs one exchange to completion: attempt, decide, optionally refresh, wait, repeat.
///
/// The returned response may still be a non-2xx status (the decider declined or the budget
/// ran out); classifying it is up to the caller.
#[derive(Clone)]
pub struct RetryMiddleware {
    transport: Arc<dyn HttpTransport>,
    decider: Arc<dyn RetryDecider>,
    mutator: Arc<dyn RequestMutator>,
    delay: Arc<dyn DelayPolicy>,
}

impl RetryMiddleware {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        decider: Arc<dyn RetryDecider>,
        mutator: Arc<dyn RequestMutator>,
        delay: Arc<dyn DelayPolicy>,
    ) -> Self {
        Self {
            transport,
            decider,
            mutator,
            delay,
        }
    }

    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RestError> {
        let outcome = self.attempt(&request).await;
        let mut ctx = RetryContext::new(request, outcome);

        loop {
            if !self.decider.should_retry(&ctx) {
                let attempt = ctx.attempt;
                return match ctx.into_outcome() {
                    Ok(response) => {
                        debug!(
                            attempt,
                            status = %response.status,
                            "[RestApi] Exchange finished"
                        );
                        Ok(response)
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "[RestApi] Exchange failed");
                        Err(err.into())
                    }
                };
            }

            let wait = self.delay.delay(ctx.attempt + 1);

            if let Some(response) = ctx.response()
                && response.status == StatusCode::UNAUTHORIZED
            {
                let response = response.clone();
                let request = ctx.request.clone();
                ctx.request = self.mutator.mutate(request, &response).await?;
            }

            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            ctx.attempt += 1;
            let outcome = self.attempt(&ctx.request).await;
            ctx.record(outcome);
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> AttemptOutcome {
        match self.transport.execute(request).await {
            Ok(response) => AttemptOutcome::Response(response),
            Err(err) => AttemptOutcome::Transport(err),
        }
    }
}
