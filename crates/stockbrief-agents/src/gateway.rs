use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use stockbrief_models::config::GatewayConfig;
use stockbrief_models::report::TokenUsage;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GatewayError, TransportError};
use crate::prompts::PromptPayload;
use crate::retry::{AttemptState, Clock, RetryMachine, RetryPolicy, TokioClock};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    /// Output was cut at the token limit.
    MaxTokens,
    StopSequence,
    Other,
}

/// One successful provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
    pub model: String,
}

/// A provider reply plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
    pub model: String,
    pub attempts: u32,
}

/// Sends a single request to a model provider. No retries.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(
        &self,
        payload: &PromptPayload,
        timeout: Duration,
    ) -> Result<Completion, TransportError>;
}

/// Bounded, paced, retrying access to a model provider. Shared across section tasks
/// behind an `Arc`.
pub struct LlmGateway {
    transport: Arc<dyn ModelTransport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    permits: Semaphore,
    limiter: Option<SharedRateLimiter>,
}

impl LlmGateway {
    pub fn new(transport: Arc<dyn ModelTransport>, config: &GatewayConfig) -> Self {
        Self::with_clock(transport, Arc::new(TokioClock), config)
    }

    pub fn with_clock(
        transport: Arc<dyn ModelTransport>,
        clock: Arc<dyn Clock>,
        config: &GatewayConfig,
    ) -> Self {
        let limiter = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));

        Self {
            transport,
            clock,
            policy: RetryPolicy::from(&config.retry),
            permits: Semaphore::new(config.max_in_flight.max(1)),
            limiter,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Refuse further requests. Calls waiting for a permit fail with `Closed`.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Send `payload`, retrying transient failures per the retry policy. `timeout`
    /// bounds each attempt, not the whole call.
    pub async fn invoke(
        &self,
        payload: &PromptPayload,
        timeout: Duration,
    ) -> Result<ModelResponse, GatewayError> {
        let mut machine = RetryMachine::new(self.policy.clone());

        loop {
            let attempt = machine.begin();
            let outcome = self.attempt(payload, timeout).await?;

            let error = match outcome {
                Ok(completion) => {
                    machine.succeed();
                    debug!(
                        section = %payload.section,
                        attempt,
                        input_tokens = completion.usage.input_tokens,
                        output_tokens = completion.usage.output_tokens,
                        "Model call succeeded"
                    );
                    return Ok(ModelResponse {
                        text: completion.text,
                        stop_reason: completion.stop_reason,
                        usage: completion.usage,
                        model: completion.model,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            let jitter: f64 = rand::random();
            match machine.fail(error.is_transient(), error.retry_after(), jitter) {
                AttemptState::RetryScheduled { delay, .. } => {
                    let delay = *delay;
                    warn!(
                        section = %payload.section,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Model call failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                }
                AttemptState::Failed { attempts } => {
                    warn!(
                        section = %payload.section,
                        attempts = *attempts,
                        error = %error,
                        "Model call failed"
                    );
                    return Err(GatewayError::from_transport(error, *attempts));
                }
                other => {
                    return Err(GatewayError::UnexpectedResponse(format!(
                        "retry machine in unexpected state {other:?}"
                    )))
                }
            }
        }
    }

    /// One permit-holding attempt. The permit is released before any backoff sleep.
    async fn attempt(
        &self,
        payload: &PromptPayload,
        timeout: Duration,
    ) -> Result<Result<Completion, TransportError>, GatewayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Closed)?;

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        Ok(
            match tokio::time::timeout(timeout, self.transport.send(payload, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            },
        )
    }
}
