//! Per-identity windowed request counting.
//!
//! Counters are process-local and reset on restart; a multi-instance
//! deployment gets per-instance limits. Keys are `{scope}:{identity}` so the
//! same IP or runner id is counted independently per endpoint class.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Submit/check requests per window per client IP.
pub const SUBMIT_PER_WINDOW: u32 = 10;
/// Status polls per window per client IP.
pub const STATUS_PER_WINDOW: u32 = 60;
/// Available/heartbeat requests per window per runner id.
pub const RUNNER_PER_WINDOW: u32 = 120;

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request against `key`. Returns the seconds until the window
    /// resets when the limit is exhausted.
    pub fn check(&self, key: &str, limit: u32) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started_at) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count > limit {
            let elapsed = now.duration_since(entry.started_at);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(remaining.as_secs().max(1));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60));

        for _ in 0..5 {
            assert!(limiter.check("submit:1.2.3.4", 5).is_ok());
        }
        assert!(limiter.check("submit:1.2.3.4", 5).is_err());

        // A different identity has its own window.
        assert!(limiter.check("submit:5.6.7.8", 5).is_ok());
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::new(Duration::from_millis(50));

        assert!(limiter.check("k", 1).is_ok());
        assert!(limiter.check("k", 1).is_err());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check("k", 1).is_ok());
    }

    #[test]
    fn rejection_reports_reset_hint() {
        let limiter = RateLimiter::new(Duration::from_secs(60));

        assert!(limiter.check("k", 1).is_ok());
        let retry_after = limiter.check("k", 1).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }
}
