//! Retry delay computation for transient delivery failures.

use std::time::Duration;

use rand::Rng;

use crate::notification::RetryPolicy;

/// Exponent ceiling; the delay cap applies long before this matters.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Delay to wait after `completed_attempt` (1-based) before the next try.
///
/// Fixed policies wait `retry_delay_ms` every time. With exponential backoff
/// the k-th completed attempt waits `retry_delay_ms * 2^(k-1)`, capped at
/// `max_delay_ms`. A non-zero `jitter_factor` spreads delays by up to that
/// fraction in either direction; the default of zero keeps them deterministic.
pub fn retry_delay(policy: &RetryPolicy, completed_attempt: u32, max_delay_ms: u64) -> Duration {
    let base = if policy.exponential_backoff {
        let exponent = completed_attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        policy.retry_delay_ms.saturating_mul(1u64 << exponent)
    } else {
        policy.retry_delay_ms
    };

    let capped = base.min(max_delay_ms);

    let final_delay = if policy.jitter_factor > 0.0 {
        let jitter_range = capped as f64 * policy.jitter_factor.min(1.0);
        if jitter_range >= 1.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped as f64 + jitter).max(0.0) as u64
        } else {
            capped
        }
    } else {
        capped
    };

    Duration::from_millis(final_delay)
}
