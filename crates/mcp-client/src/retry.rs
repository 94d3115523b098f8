//! Exponential backoff schedule for the connect sequence.

use std::time::Duration;

use fleet_domain::config::RetryPolicy;

/// Delay inserted after failed attempt `attempt` (1-based):
/// `min(base · multiplier^(attempt-1), max)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1);
    let raw = policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(exp as i32);
    let capped = raw.min(policy.max_delay_ms as f64);
    Duration::from_millis(capped as u64)
}
