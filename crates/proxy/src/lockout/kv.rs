//! The `KvStore` contract the lockout engine is built against, plus the in-process
//! implementation used by the default (`LOCKOUT_STORE=memory`) deployment and by
//! tests. A distributed backend (`redis://...`) can satisfy the same trait without
//! the engine itself changing — see SPEC_FULL.md §6a.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Small key-value store with per-key TTL, the contract the lockout engine needs.
/// Errors are opaque: the engine treats any `Err` from `get` as "no state" (fail
/// open) and any `Err` from `put`/`delete` as "ignore, log, move on."
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
	async fn put(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
	async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

struct Entry {
	value: String,
	expires_at: std::time::Instant,
}

/// An in-process `KvStore` guarded by a single mutex, with lazy TTL expiry checked
/// on read. Correct for a single-instance deployment and for tests; not shared
/// across process boundaries.
#[derive(Default)]
pub struct MemoryKvStore {
	entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
	async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
		let mut entries = self.entries.lock();
		if let Some(entry) = entries.get(key) {
			if entry.expires_at <= std::time::Instant::now() {
				entries.remove(key);
				return Ok(None);
			}
			return Ok(Some(entry.value.clone()));
		}
		Ok(None)
	}

	async fn put(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
		self.entries.lock().insert(
			key.to_string(),
			Entry {
				value,
				expires_at: std::time::Instant::now() + ttl,
			},
		);
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<()> {
		self.entries.lock().remove(key);
		Ok(())
	}
}

/// Lightweight round-trip used by the `/health` diagnostic to report
/// `services.lockout_store`.
pub async fn probe(store: &(dyn KvStore + Send + Sync)) -> bool {
	const PROBE_KEY: &str = "auth:lockout:__health_probe__";
	store
		.put(PROBE_KEY, "1".to_string(), Duration::from_secs(5))
		.await
		.is_ok()
		&& store.delete(PROBE_KEY).await.is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn put_get_delete_round_trip() {
		let store = MemoryKvStore::new();
		assert_eq!(store.get("k").await.unwrap(), None);
		store
			.put("k", "v".to_string(), Duration::from_secs(60))
			.await
			.unwrap();
		assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
		store.delete("k").await.unwrap();
		assert_eq!(store.get("k").await.unwrap(), None);
	}

	#[tokio::test]
	async fn expired_entries_read_as_absent() {
		let store = MemoryKvStore::new();
		store
			.put("k", "v".to_string(), Duration::from_millis(1))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(store.get("k").await.unwrap(), None);
	}
}
