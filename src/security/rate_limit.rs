use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Default limiter window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);
/// Default number of accepted requests per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 30;

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_start: Instant,
}

/// Per-key fixed-window counter.
///
/// The first request after a window has elapsed starts a new window with
/// a count of one. Inside a window requests are allowed until the count
/// reaches the maximum; denied requests do not increment the counter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    records: DashMap<String, RateLimitRecord>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, window: Duration, max_requests: u32) -> bool {
        self.check_at(key, window, max_requests, Instant::now())
    }

    /// Same as [`RateLimiter::check`] with an explicit clock reading.
    pub fn check_at(&self, key: &str, window: Duration, max_requests: u32, now: Instant) -> bool {
        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert(RateLimitRecord {
                count: 0,
                window_start: now,
            });
        let record = entry.value_mut();
        if record.count == 0 || now.saturating_duration_since(record.window_start) > window {
            record.count = 1;
            record.window_start = now;
            return true;
        }
        if record.count < max_requests {
            record.count += 1;
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}
