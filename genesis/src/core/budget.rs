//! Retry backoff arithmetic.

use std::time::Duration;

/// Delay before retry number `retry` (1-based) of the same backend.
///
/// Doubles from `initial` and saturates at `max`.
pub fn backoff_delay(retry: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    initial
        .checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Total time spent sleeping if every one of `attempts` calls fails transiently.
pub fn worst_case_backoff(attempts: u32, initial: Duration, max: Duration) -> Duration {
    (1..attempts)
        .map(|retry| backoff_delay(retry, initial, max))
        .sum()
}
