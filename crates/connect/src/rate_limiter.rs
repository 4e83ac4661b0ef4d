//! Process-wide token bucket shared by every outbound call to the LMS.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Interval between refill checks while the bucket is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with continuous refill of `capacity` tokens per minute.
///
/// Starts full, so a cold process may burst up to `capacity` calls before
/// settling at the steady-state rate.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    poll_interval: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token if available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            sleep(self.poll_interval).await;
        }
    }

    /// Tokens currently in the bucket, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens
    }
}
