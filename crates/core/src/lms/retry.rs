//! Retry classification and backoff helpers for remote calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy classification for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Statuses the remote LMS uses for throttling and transient failure.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Classify an HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        s if RETRYABLE_STATUSES.contains(&s) => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1_u32 << exp)
}
