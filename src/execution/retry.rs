use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::exchange::ExchangeClient;
use super::order::{OrderAck, OrderRequest};
use crate::error::{ExchangeError, TickError};

/// Exponential backoff with jitter between submission attempts.
///
/// Formula: min(max_delay, base * 2^attempt) + random_jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), 0.1)
    }
}

impl ExponentialBackoff {
    /// Negative jitter factors are clamped to 0.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.max(0.0),
            attempt: 0,
        }
    }

    /// Calculate the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped_delay = exp_delay.min(self.max_delay);

        let jitter_range = capped_delay.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_secs = (capped_delay.as_secs_f64() + jitter).max(0.0);

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_secs_f64(final_secs)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Bounds for talking to the exchange
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_factor: f64,
    /// Deadline for every single exchange call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(5),
            jitter_factor: 0.1,
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base, self.backoff_max, self.jitter_factor)
    }
}

/// Run an exchange call with a deadline; a timeout counts as a retryable error
pub async fn with_timeout<T, F>(deadline: Duration, call: F) -> Result<T, ExchangeError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ExchangeError::timeout(deadline)),
    }
}

/// Submit an order, retrying retryable failures with the same idempotency key.
///
/// Before every resubmission the key is looked up on the exchange, so an
/// attempt that reached the venue but whose answer was lost is adopted
/// instead of being sent twice. Non-retryable errors stop immediately.
pub async fn submit_with_retry(
    client: &dyn ExchangeClient,
    request: &OrderRequest,
    policy: &RetryPolicy,
) -> Result<OrderAck, TickError> {
    let mut backoff = policy.backoff();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match with_timeout(policy.call_timeout, client.submit_order(request)).await {
            Ok(ack) => return Ok(ack),
            Err(e) => e,
        };

        if !error.retryable || attempt >= max_attempts {
            tracing::error!(
                pair = %request.pair,
                key = %request.idempotency_key,
                "Order submission failed after {} attempt(s): {}",
                attempt,
                error
            );
            return Err(TickError::SubmissionFailed {
                pair: request.pair.clone(),
                key: request.idempotency_key.clone(),
                attempts: attempt,
                source: error,
            });
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            pair = %request.pair,
            key = %request.idempotency_key,
            "Submission attempt {}/{} failed ({}), retrying in {:?}",
            attempt,
            max_attempts,
            error,
            delay
        );
        tokio::time::sleep(delay).await;

        match with_timeout(
            policy.call_timeout,
            client.find_order(&request.pair, &request.idempotency_key),
        )
        .await
        {
            Ok(Some(ack)) => {
                tracing::info!(
                    key = %request.idempotency_key,
                    "Order already reached the exchange, adopting it"
                );
                return Ok(ack);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(key = %request.idempotency_key, "Order lookup failed: {}", e);
            }
        }
    }
}
