//! Progressive per-IP authentication lockout. A failed login increments a counter
//! keyed by client IP; crossing the threshold locks the IP for a duration that
//! doubles on each successive lockout cycle, capped at `MAX_DURATION`. Successful
//! logins clear the record outright. See spec §4.5 for the full state machine.

pub mod kv;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use kv::{KvStore, MemoryKvStore};

pub const MAX_ATTEMPTS: u32 = 5;
pub const INITIAL_DURATION_SECS: u64 = 30;
pub const MAX_DURATION_SECS: u64 = 300;
pub const ATTEMPT_WINDOW_SECS: u64 = 900;
pub const KV_TTL_SECS: u64 = 3600;

fn lockout_key(ip: &str) -> String {
	format!("auth:lockout:{ip}")
}

/// Persisted per-IP lockout record. `lockout_count` is retained across window resets
/// so a repeat offender's back-off never resets just by waiting out the window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockoutState {
	pub failed_attempts: u32,
	pub first_attempt_at: i64,
	pub locked_until: Option<i64>,
	pub lockout_count: u32,
}

/// The decision returned to the pipeline: whether the IP is currently locked, and —
/// if not — how many attempts remain before it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
	pub locked: bool,
	pub remaining_seconds: u64,
	pub failed_attempts: u32,
	pub attempts_remaining: u32,
	/// Epoch-milliseconds the lock expires at, for the 423 body; `None` when unlocked.
	pub locked_until: Option<i64>,
}

impl LockoutStatus {
	fn none() -> Self {
		LockoutStatus {
			locked: false,
			remaining_seconds: 0,
			failed_attempts: 0,
			attempts_remaining: MAX_ATTEMPTS,
			locked_until: None,
		}
	}
}

/// Reads and JSON-decodes the record for `ip`. Corrupted or absent state is treated
/// identically — as "no record" — so the next write heals it; a KV read failure is
/// likewise treated as no state (fail-open on the counter).
pub async fn get_auth_lockout_state(kv: &dyn KvStore, ip: &str) -> Option<LockoutState> {
	let raw = match kv.get(&lockout_key(ip)).await {
		Ok(Some(raw)) => raw,
		Ok(None) => return None,
		Err(err) => {
			tracing::warn!(error = %err, %ip, "lockout kv read failed, treating as no state");
			return None;
		},
	};
	match serde_json::from_str::<LockoutState>(&raw) {
		Ok(state) => Some(state),
		Err(err) => {
			tracing::warn!(error = %err, %ip, "lockout state decode failed, treating as no state");
			None
		},
	}
}

/// Pure classification of a possibly-absent record against the current time. A
/// window that has elapsed with no active lock is treated as equivalent to no
/// record for decision purposes (but `lockout_count` still carries forward on the
/// next write — see `record_failed_attempt`).
pub fn check_lockout_status(state: Option<&LockoutState>, now_ms: i64) -> LockoutStatus {
	let Some(state) = state else {
		return LockoutStatus::none();
	};
	if let Some(locked_until) = state.locked_until {
		if locked_until > now_ms {
			let remaining_seconds = ((locked_until - now_ms) as f64 / 1000.0).ceil() as u64;
			return LockoutStatus {
				locked: true,
				remaining_seconds,
				failed_attempts: state.failed_attempts,
				attempts_remaining: 0,
				locked_until: Some(locked_until),
			};
		}
	}
	let window_expired = now_ms > state.first_attempt_at + (ATTEMPT_WINDOW_SECS as i64 * 1000);
	if window_expired {
		return LockoutStatus::none();
	}
	LockoutStatus {
		locked: false,
		remaining_seconds: 0,
		failed_attempts: state.failed_attempts,
		attempts_remaining: MAX_ATTEMPTS.saturating_sub(state.failed_attempts),
		locked_until: None,
	}
}

/// `min(INITIAL_DURATION * 2^lockout_count, MAX_DURATION)`, in seconds.
pub fn calculate_lockout_duration(lockout_count: u32) -> u64 {
	INITIAL_DURATION_SECS
		.saturating_mul(1u64.checked_shl(lockout_count).unwrap_or(u64::MAX))
		.min(MAX_DURATION_SECS)
}

/// Applies one failed-login transition and persists the result with the fixed KV
/// TTL. Returns the post-write status. A currently-locked record is left untouched
/// (defensive no-op; the client is already being throttled).
pub async fn record_failed_attempt(kv: &dyn KvStore, ip: &str, now_ms: i64) -> LockoutStatus {
	let prior = get_auth_lockout_state(kv, ip).await;
	let prior_status = check_lockout_status(prior.as_ref(), now_ms);

	if prior_status.locked {
		return prior_status;
	}

	let window_expired = prior
		.as_ref()
		.map(|s| now_ms > s.first_attempt_at + (ATTEMPT_WINDOW_SECS as i64 * 1000))
		.unwrap_or(false);
	// A lock that has already expired (but whose 15-minute window hasn't) starts a
	// fresh COUNTING cycle too, exactly like a window reset — otherwise
	// `failed_attempts` keeps climbing past MAX_ATTEMPTS across cycles and the very
	// first post-expiry failure re-locks instead of the fifth.
	let lock_expired = prior
		.as_ref()
		.and_then(|s| s.locked_until)
		.map(|locked_until| locked_until <= now_ms)
		.unwrap_or(false);

	let new_state = match prior {
		None => LockoutState {
			failed_attempts: 1,
			first_attempt_at: now_ms,
			locked_until: None,
			lockout_count: 0,
		},
		Some(prior) if window_expired || lock_expired => LockoutState {
			failed_attempts: 1,
			first_attempt_at: now_ms,
			locked_until: None,
			lockout_count: prior.lockout_count,
		},
		Some(mut prior) => {
			prior.failed_attempts += 1;
			prior.locked_until = None;
			if prior.failed_attempts >= MAX_ATTEMPTS {
				let duration = calculate_lockout_duration(prior.lockout_count);
				prior.locked_until = Some(now_ms + duration as i64 * 1000);
				prior.lockout_count += 1;
			}
			prior
		},
	};

	if let Ok(encoded) = serde_json::to_string(&new_state) {
		if let Err(err) = kv
			.put(&lockout_key(ip), encoded, Duration::from_secs(KV_TTL_SECS))
			.await
		{
			tracing::warn!(error = %err, %ip, "lockout kv write failed, ignoring");
		}
	}

	check_lockout_status(Some(&new_state), now_ms)
}

/// Unconditional delete, called when a login succeeds regardless of prior state.
pub async fn clear_auth_lockout(kv: &dyn KvStore, ip: &str) {
	if let Err(err) = kv.delete(&lockout_key(ip)).await {
		tracing::warn!(error = %err, %ip, "lockout kv delete failed, ignoring");
	}
}

/// The upstream authentication sub-path this proxy also recognizes as an auth
/// request beyond the literal `/login` path.
const AUTH_SUBPATH: &str = "sportmanager.volleyball/authentication";

/// True when `method` is POST (the normal case) or GET (to accommodate a browser
/// resubmission pattern — see DESIGN NOTES open question) and `pathname` is `/login`
/// or touches the upstream's authentication sub-path.
pub fn is_auth_request(pathname: &str, method: &http::Method) -> bool {
	if *method != http::Method::POST && *method != http::Method::GET {
		return false;
	}
	pathname == "/login" || pathname.contains(AUTH_SUBPATH)
}

#[cfg(test)]
mod tests {
	use super::*;
	use kv::MemoryKvStore;

	const IP: &str = "192.168.1.1";

	#[tokio::test]
	async fn five_failures_lock_with_progressive_duration() {
		let store = MemoryKvStore::new();
		let mut now = 1_000_000_i64;

		for expected in 1..=4 {
			let status = record_failed_attempt(&store, IP, now).await;
			assert!(!status.locked);
			assert_eq!(status.failed_attempts, expected);
			now += 1000;
		}

		let status = record_failed_attempt(&store, IP, now).await;
		assert!(status.locked);
		assert!(status.remaining_seconds <= 30);

		let state = get_auth_lockout_state(&store, IP).await.unwrap();
		assert_eq!(state.lockout_count, 1);

		// Within the lock window a further attempt is a no-op.
		let status = record_failed_attempt(&store, IP, now + 1000).await;
		assert!(status.locked);
	}

	#[tokio::test]
	async fn second_lockout_cycle_doubles_duration() {
		let store = MemoryKvStore::new();
		let mut now = 0_i64;
		for _ in 0..5 {
			let status = record_failed_attempt(&store, IP, now).await;
			assert!(status.failed_attempts <= MAX_ATTEMPTS, "failed_attempts must never exceed MAX_ATTEMPTS at rest");
			now += 1000;
		}
		let state = get_auth_lockout_state(&store, IP).await.unwrap();
		let locked_until = state.locked_until.unwrap();

		// Once the first lock (30s) expires within the same 15-minute window, the
		// engine starts a fresh COUNTING cycle (lockout_count preserved) — it takes
		// five more failures, not one, to cross the threshold again.
		now = locked_until + 1;
		for expected in 1..=4 {
			let status = record_failed_attempt(&store, IP, now).await;
			assert!(!status.locked);
			assert_eq!(status.failed_attempts, expected);
			assert!(status.failed_attempts <= MAX_ATTEMPTS);
			now += 1000;
		}
		let status = record_failed_attempt(&store, IP, now).await;
		assert!(status.locked);
		assert!(status.failed_attempts <= MAX_ATTEMPTS, "failed_attempts must never exceed MAX_ATTEMPTS at rest");
		let state = get_auth_lockout_state(&store, IP).await.unwrap();
		assert_eq!(state.lockout_count, 2);
		assert_eq!(
			state.locked_until.unwrap() - now,
			calculate_lockout_duration(1) as i64 * 1000
		);
	}

	#[tokio::test]
	async fn success_clears_state_regardless_of_prior() {
		let store = MemoryKvStore::new();
		record_failed_attempt(&store, IP, 0).await;
		clear_auth_lockout(&store, IP).await;
		assert!(get_auth_lockout_state(&store, IP).await.is_none());
	}

	#[tokio::test]
	async fn window_reset_preserves_lockout_count() {
		let store = MemoryKvStore::new();
		let mut now = 0_i64;
		for _ in 0..5 {
			record_failed_attempt(&store, IP, now).await;
			now += 1000;
		}
		let state = get_auth_lockout_state(&store, IP).await.unwrap();
		assert_eq!(state.lockout_count, 1);

		// Let the 15-minute window (not just the 30s lock) elapse entirely.
		now = state.first_attempt_at + ATTEMPT_WINDOW_SECS as i64 * 1000 + 1;
		let status = record_failed_attempt(&store, IP, now).await;
		assert!(!status.locked);
		assert_eq!(status.failed_attempts, 1);
		let state = get_auth_lockout_state(&store, IP).await.unwrap();
		assert_eq!(state.lockout_count, 1, "lockout_count must survive a window reset");
	}

	#[test]
	fn duration_schedule_is_30_60_120_240_300_300() {
		let expected = [30, 60, 120, 240, 300, 300];
		for (count, want) in expected.into_iter().enumerate() {
			assert_eq!(calculate_lockout_duration(count as u32), want);
		}
	}

	#[test]
	fn auth_request_matches_login_path_and_post_or_get() {
		assert!(is_auth_request("/login", &http::Method::POST));
		assert!(is_auth_request("/login", &http::Method::GET));
		assert!(!is_auth_request("/login", &http::Method::PUT));
		assert!(!is_auth_request("/dashboard", &http::Method::POST));
	}
}
