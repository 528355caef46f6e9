//! Delay between retry attempts.
//!
//! Exponential from the policy's base delay, capped at its max, plus up to
//! 10% jitter. A delay that would reach the caller's deadline is refused.

use std::time::Duration;

use rand::Rng;

use crate::resilience::retries::RetryPolicy;

const JITTER_FRACTION: f64 = 0.1;

/// Delay to sleep before retry number `attempt` (1-based).
///
/// `remaining` is the time left before the call deadline. Returns `None`
/// when the delay would use all of it, since the retry could not start.
pub fn retry_delay(policy: &RetryPolicy, attempt: u32, remaining: Option<Duration>) -> Option<Duration> {
    let delay = jittered(exponential(policy, attempt));
    match remaining {
        Some(left) if left <= delay => None,
        _ => Some(delay),
    }
}

fn exponential(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    policy.base_delay.saturating_mul(factor).min(policy.max_delay)
}

fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let fraction = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
    delay.saturating_add(delay.mul_f64(fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy();

        assert_eq!(retry_delay(&policy, 0, None), Some(Duration::ZERO));

        let d1 = retry_delay(&policy, 1, None).unwrap();
        assert!(d1 >= Duration::from_millis(100) && d1 < Duration::from_millis(110));

        let d2 = retry_delay(&policy, 2, None).unwrap();
        assert!(d2 >= Duration::from_millis(200) && d2 < Duration::from_millis(220));

        let capped = retry_delay(&policy, 30, None).unwrap();
        assert!(capped >= Duration::from_secs(1) && capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_delay_refused_when_deadline_too_close() {
        let policy = policy();

        assert_eq!(retry_delay(&policy, 1, Some(Duration::from_millis(50))), None);
        assert_eq!(retry_delay(&policy, 1, Some(Duration::ZERO)), None);
        assert!(retry_delay(&policy, 1, Some(Duration::from_secs(5))).is_some());
    }

    #[test]
    fn test_huge_policy_does_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::MAX,
            max_delay: Duration::MAX,
        };
        assert_eq!(retry_delay(&policy, u32::MAX, None), Some(Duration::MAX));
    }
}
