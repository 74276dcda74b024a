// src/provider/retry.rs — Transport-level retry with exponential backoff
//
// Wraps any ChatProvider with automatic retry on transient failures:
// rate limits (429), server errors (5xx), timeouts, connection failures.
// Client errors (4xx other than 429) are returned immediately. This sits
// below the query-level retry loop and never sees query failures. Total
// sleep is bounded by `sleep_budget` so a backoff never outlives the stage
// timeout wrapped around the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatProvider, ChatRequest, ChatResponse};
use crate::infra::errors::QueryLoopError;

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY_MS: u64 = 1_000;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 15_000;
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    /// Upper bound on the summed backoff sleeps of one call.
    pub sleep_budget: Duration,
}

impl BackoffConfig {
    /// Default curve with half of `stage_limit` as the sleep budget, leaving
    /// the other half for the requests themselves.
    pub fn within(stage_limit: Duration) -> Self {
        Self {
            sleep_budget: stage_limit / 2,
            ..Self::default()
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
            sleep_budget: Duration::from_millis(MAX_DELAY_MS * MAX_RETRIES as u64),
        }
    }
}

pub struct RetryProvider {
    inner: Arc<dyn ChatProvider>,
    config: BackoffConfig,
}

impl RetryProvider {
    pub fn with_config(inner: Arc<dyn ChatProvider>, config: BackoffConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry number `attempt` (0-indexed).
    fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }

        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter = deterministic_jitter(attempt, self.config.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(10.0);

        Duration::from_millis(final_ms as u64)
    }
}

fn rate_limit_delay(error: &QueryLoopError) -> Option<Duration> {
    match error {
        QueryLoopError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], stable per attempt.
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

#[async_trait]
impl ChatProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, QueryLoopError> {
        let mut last_error = None;
        let mut slept = Duration::ZERO;

        for attempt in 0..=self.config.max_retries {
            match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retriable() || attempt == self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt, rate_limit_delay(&e));
                    if slept + delay > self.config.sleep_budget {
                        tracing::warn!(
                            provider = self.inner.id(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Backoff budget spent, giving up: {e}"
                        );
                        return Err(e);
                    }
                    slept += delay;
                    tracing::warn!(
                        provider = self.inner.id(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(QueryLoopError::Provider {
            provider: self.inner.id().to_string(),
            message: "All retries exhausted".into(),
            retriable: false,
        }))
    }
}
