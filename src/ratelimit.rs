// SPDX-License-Identifier: MIT
//! Fixed-window request counter keyed by raw API key.
//!
//! The limiter is per-process and best-effort: a horizontally scaled
//! deployment would need a shared counter with atomic increment-and-expire
//! semantics. Callers interact only through [`RateLimiter::check`], so the
//! map can later be swapped for a distributed implementation without
//! touching the REST layer.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Outcome of a single admission check, also used to populate the
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: i64,
    count: u32,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    limit: u32,
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window_ms: window.as_millis() as i64,
        }
    }

    /// Admission check for `key` at the current wall clock.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now().timestamp_millis()).await
    }

    /// Admission check at an explicit timestamp. A rejected request does not
    /// extend the window; the counter resets only once the window elapses.
    pub async fn check_at(&self, key: &str, now_ms: i64) -> RateLimitDecision {
        let mut windows = self.windows.lock().await;

        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now_ms - w.started_at_ms >= self.window_ms {
                    w.started_at_ms = now_ms;
                    w.count = 0;
                }
            })
            .or_insert(Window {
                started_at_ms: now_ms,
                count: 0,
            });

        let reset_at_ms = window.started_at_ms + self.window_ms;
        if window.count >= self.limit {
            return RateLimitDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at_ms,
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - window.count,
            reset_at_ms,
        }
    }

    /// Evicts entries whose window has already elapsed, bounding memory to
    /// currently active keys. Returns the number of evicted entries.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp_millis()).await
    }

    pub async fn sweep_at(&self, now_ms: i64) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, w| now_ms - w.started_at_ms < self.window_ms);
        before - windows.len()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
