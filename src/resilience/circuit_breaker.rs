//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: a single probe is testing whether the downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first admission check after reset_timeout
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (reset window restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per resource, owned by a registry (no globals)
//! - The probe slot lives under the same lock as the state, so exactly one
//!   caller can hold it
//! - The probe is an RAII permit: dropping or cancelling it frees the slot
//! - Caller cancellation and deadline expiry are never counted as failures

use std::fmt;
use std::future::Future;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CancelReason;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds for a single breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit. Must be positive.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without running the operation.
    Open { name: String },
    /// The caller gave up before the operation finished.
    Cancelled(CancelReason),
    /// The operation ran and failed.
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { name } => write!(f, "circuit breaker '{}' is open", name),
            BreakerError::Cancelled(reason) => write!(f, "call {}", reason),
            BreakerError::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E> std::error::Error for BreakerError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// How a caller got through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Per-resource failure-tracking state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let breaker = Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        };
        metrics::record_breaker_state(&breaker.name, CircuitState::Closed);
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.read().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.read().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.read();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Check whether a call may proceed.
    ///
    /// When this returns true for an Open or Half-Open breaker the caller
    /// holds the probe slot and must report the outcome through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_request(&self) -> bool {
        self.admit().is_some()
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        self.settle(Admission::Probe, true);
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        self.settle(Admission::Probe, false);
    }

    /// Run `operation` under breaker protection.
    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        match operation.await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Run `operation` under breaker protection, abandoning it when `cancel`
    /// fires or `deadline` passes.
    ///
    /// An abandoned operation leaves the failure count untouched and frees the
    /// probe slot if this call held it.
    pub async fn execute_with<F, T, E>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() {
            return Err(BreakerError::Cancelled(CancelReason::Cancelled));
        }
        if deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(BreakerError::Cancelled(CancelReason::DeadlineExceeded));
        }

        let permit = self.acquire()?;
        let expiry = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CancelReason::Cancelled),
            _ = expiry => Err(CancelReason::DeadlineExceeded),
            result = operation => Ok(result),
        };

        match outcome {
            Ok(Ok(value)) => {
                permit.succeed();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.fail();
                Err(BreakerError::Operation(e))
            }
            Err(reason) => {
                tracing::debug!(circuit = %self.name, %reason, "Call abandoned, not counted");
                drop(permit);
                Err(BreakerError::Cancelled(reason))
            }
        }
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        match self.admit() {
            Some(admission) => Ok(Permit {
                breaker: self,
                admission,
                settled: false,
            }),
            None => {
                tracing::debug!(circuit = %self.name, "Circuit open, failing fast");
                metrics::record_breaker_rejection(&self.name);
                Err(BreakerError::Open {
                    name: self.name.clone(),
                })
            }
        }
    }

    fn admit(&self) -> Option<Admission> {
        let (admission, left_open) = self.take_admission();
        if left_open {
            self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
        }
        admission
    }

    /// Decide admission under the lock. The flag is set only when this call
    /// moved the breaker out of Open; re-taking a released probe slot in
    /// Half-Open is not a transition.
    fn take_admission(&self) -> (Option<Admission>, bool) {
        if self.read().state == CircuitState::Closed {
            return (Some(Admission::Normal), false);
        }

        let mut inner = self.write();
        match inner.state {
            CircuitState::Closed => (Some(Admission::Normal), false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if cooled_down && !inner.probe_in_flight {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    (Some(Admission::Probe), true)
                } else {
                    (None, false)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    (None, false)
                } else {
                    inner.probe_in_flight = true;
                    (Some(Admission::Probe), false)
                }
            }
        }
    }

    fn settle(&self, admission: Admission, success: bool) {
        let mut inner = self.write();
        let from = inner.state;
        let to = match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.consecutive_failures = 0;
                None
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) if admission == Admission::Probe => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
                Some(CircuitState::Closed)
            }
            (CircuitState::HalfOpen, false) if admission == Admission::Probe => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                inner.probe_in_flight = false;
                Some(CircuitState::Open)
            }
            // Late results from calls admitted before the circuit left Closed.
            _ => None,
        };
        let failures = inner.consecutive_failures;
        drop(inner);

        if let Some(to) = to {
            if from == CircuitState::Closed {
                tracing::error!(circuit = %self.name, failure_count = failures, "Circuit opened");
            }
            self.transitioned(from, to);
        }
    }

    fn release(&self, admission: Admission) {
        if admission != Admission::Probe {
            return;
        }
        let mut inner = self.write();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Closed => tracing::info!(circuit = %self.name, %from, "Circuit closed"),
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, "Circuit transitioned to HALF_OPEN")
            }
            CircuitState::Open if from == CircuitState::HalfOpen => {
                tracing::warn!(circuit = %self.name, "Probe failed, circuit reopened")
            }
            CircuitState::Open => {}
        }
        metrics::record_breaker_state(&self.name, to);
    }

    fn read(&self) -> RwLockReadGuard<'_, BreakerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission held for the duration of one guarded call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, true);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.settle(self.admission, false);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.admission);
        }
    }
}
