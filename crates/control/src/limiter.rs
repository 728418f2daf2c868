// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window admission counter keyed by arbitrary string.
///
/// Transports compose the keys (`"ui:"+token`, `"agent:"+token`). A fresh
/// window opens lazily once the prior one has elapsed.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = if limit == 0 { 200 } else { limit };
        let window = if window.is_zero() { Duration::from_secs(60) } else { window };
        Self { limit, window, buckets: Mutex::new(HashMap::new()) }
    }

    /// Admit one request for `key`, returning false once the current window
    /// is exhausted.
    pub fn allow(&self, key: &str) -> bool {
        let key = if key.is_empty() { "anonymous" } else { key };
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(key) {
            Some(w) if now.duration_since(w.start) < self.window => {
                if w.count >= self.limit {
                    return false;
                }
                w.count += 1;
                true
            }
            _ => {
                buckets.insert(key.to_owned(), Window { start: now, count: 1 });
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
