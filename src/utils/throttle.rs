//! Rate limiting for repeated log lines
//!
//! Hot loops such as RTP ingest can hit the same failure thousands of times
//! per second. Each message key is logged at most once per interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-key log throttle
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` and records the time if `key` has not been logged
    /// within the interval.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get_mut(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                map.insert(key.to_owned(), now);
                true
            }
        }
    }

    /// Forget `key` so the next failure is reported immediately.
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// `tracing::warn!` gated by a [`LogThrottler`]
///
/// ```rust
/// use deskcast::utils::LogThrottler;
/// use deskcast::warn_throttled;
///
/// let throttler = LogThrottler::default();
/// warn_throttled!(throttler, "ingest_video", "Dropped packet: {}", "short header");
/// ```
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}
