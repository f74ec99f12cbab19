//! Per-IP rate limiting. Expressed as a trait so the "if a limiter is configured"
//! conditionality in spec §4.6 step 5 is a real `Option<Arc<dyn RateLimiter>>` on
//! process configuration rather than a hardcoded always-on path.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
	/// Returns `true` if the request identified by `key` should be allowed.
	async fn check(&self, key: &str) -> bool;
}

struct Window {
	count: u32,
	started_at: Instant,
}

/// A fixed-window, in-process, per-key rate limiter: `limit` requests per rolling
/// one-minute window, keyed by client IP.
pub struct FixedWindowRateLimiter {
	limit: u32,
	window: Duration,
	state: Mutex<HashMap<String, Window>>,
}

impl FixedWindowRateLimiter {
	pub fn per_minute(limit: u32) -> Self {
		Self {
			limit,
			window: Duration::from_secs(60),
			state: Mutex::new(HashMap::new()),
		}
	}
}

#[async_trait::async_trait]
impl RateLimiter for FixedWindowRateLimiter {
	async fn check(&self, key: &str) -> bool {
		let mut state = self.state.lock();
		let now = Instant::now();
		let entry = state.entry(key.to_string()).or_insert_with(|| Window {
			count: 0,
			started_at: now,
		});
		if now.duration_since(entry.started_at) >= self.window {
			entry.count = 0;
			entry.started_at = now;
		}
		entry.count += 1;
		entry.count <= self.limit
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn allows_up_to_limit_then_rejects() {
		let limiter = FixedWindowRateLimiter::per_minute(2);
		assert!(limiter.check("1.1.1.1").await);
		assert!(limiter.check("1.1.1.1").await);
		assert!(!limiter.check("1.1.1.1").await);
	}

	#[tokio::test]
	async fn keys_are_independent() {
		let limiter = FixedWindowRateLimiter::per_minute(1);
		assert!(limiter.check("a").await);
		assert!(limiter.check("b").await);
		assert!(!limiter.check("a").await);
	}
}
