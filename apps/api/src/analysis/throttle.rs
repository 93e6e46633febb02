//! Per-key sliding-window request throttle protecting the remote model
//! service. Best-effort: the check-then-record pattern races under
//! concurrent same-key requests, which is acceptable for a soft limiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct RequestThrottle {
    window: Duration,
    limit: usize,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RequestThrottle {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and records the request if `key` is under its limit.
    /// Timestamps older than the window are pruned lazily on each check;
    /// a denied request is not recorded.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let timestamps = hits.entry(key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.limit {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Clears all recorded requests for every key. Test isolation hook.
    pub fn reset(&self) {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        hits.clear();
    }
}
