//! Exponential backoff scheduling for incomplete dispatch passes.
//!
//! The delay before attempt *n* is retried grows exponentially and is capped:
//! `base(n) = min(2^(n-1), 15)` minutes. A ±20 % jitter spreads retries of
//! many jobs so they do not land on the same tick (thundering herd). After
//! `max_attempts` incomplete passes the job is dead-lettered.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Cap on the exponential base delay, in minutes.
pub const MAX_BASE_MINUTES: u64 = 15;

/// Jitter applied around the base delay, as a fraction.
pub const JITTER_FRACTION: f64 = 0.2;

/// The un-jittered delay before retrying attempt `attempts` (1-based).
///
/// `min(2^(attempts-1), 15)` minutes. Attempt 0 is treated as attempt 1.
pub fn base_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(10);
    let minutes = (1u64 << exponent).min(MAX_BASE_MINUTES);
    Duration::minutes(minutes as i64)
}

/// The base delay scaled by an explicit jitter factor.
///
/// Split out from [`jittered_delay`] so tests can pin the factor.
pub fn delay_with_factor(attempts: u32, factor: f64) -> Duration {
    let base_millis = base_delay(attempts).num_milliseconds() as f64;
    Duration::milliseconds((base_millis * factor) as i64)
}

/// The base delay jittered uniformly within ±20 %.
pub fn jittered_delay(attempts: u32) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
    delay_with_factor(attempts, factor)
}

/// What to do with a job after an incomplete pass, given its already
/// incremented attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`, due again at the contained instant.
    Reschedule(DateTime<Utc>),
    /// Attempts exhausted: dead-letter the job and raise an alert.
    DeadLetter,
}

/// Decides between reschedule and dead-letter.
pub fn decide(attempts: u32, max_attempts: u32, now: DateTime<Utc>) -> RetryDecision {
    if attempts >= max_attempts {
        RetryDecision::DeadLetter
    } else {
        RetryDecision::Reschedule(now + jittered_delay(attempts))
    }
}
