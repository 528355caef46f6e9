//! Transport-level retries.
//!
//! # Responsibilities
//! - Re-send a request when the transport reports a retryable failure
//! - Back off with jitter between attempts
//! - Stop early when the caller cancels or the deadline would be crossed
//!
//! # Design Decisions
//! - Wraps a transport, so the circuit breaker sees one outcome per send
//! - Connection errors and 5xx are retryable; everything else returns at once
//! - A backoff that would outlive the deadline is not slept; the last error
//!   is returned instead

use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::backoff::retry_delay;
use crate::transport::{CallContext, MessageRequest, Transport, TransportError, TransportResponse};

/// Retry settings for [`Retrying`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

/// A transport that retries its inner transport.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for Retrying<T> {
    async fn send(
        &self,
        ctx: &CallContext,
        request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.inner.send(ctx, request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }

            let Some(delay) = retry_delay(&self.policy, attempt, ctx.remaining()) else {
                return Err(err);
            };

            tracing::debug!(
                endpoint = %ctx.endpoint(),
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transport attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
