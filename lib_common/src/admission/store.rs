//! # Counter Store
//!
//! The shared store behind the admission window. A store keeps one sorted
//! collection per identity key, scored by request time in microseconds, and
//! must apply a whole slide step atomically:
//!
//! 1. remove members scored strictly below `window_start`;
//! 2. count what is left;
//! 3. add the new member at `now`;
//! 4. refresh the key's expiry to the window length.
//!
//! The count from step 2 is returned. Redis implements this with a `MULTI`
//! pipeline (see `connections::cache_redis`); [`MemoryCounterStore`] does it
//! under a mutex for single-process deployments and tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Faults reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("counter store unreachable: {0}")]
    Unreachable(String),
    /// The store rejected or failed the command.
    #[error("counter store command failed: {0}")]
    Command(String),
}

/// A keyed sorted-set store able to run one slide step atomically.
pub trait CounterStore: Send + Sync + 'static {
    /// Runs prune, count, add and expire as one unit and returns the count
    /// observed before the add.
    fn slide(
        &self,
        key: &str,
        window_start_micros: i64,
        now_micros: i64,
        member: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

#[derive(Debug, Default)]
struct Entry {
    // (score, member), ascending by score.
    members: Vec<(i64, String)>,
    expires_at_micros: i64,
}

/// # Memory Counter Store
///
/// Process-local store. Cloning shares the underlying map. The mutex is held
/// only for the synchronous slide step, never across an await.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unreachable: Arc<AtomicBool>,
}

impl MemoryCounterStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with [`StoreError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Members currently stored under `key`.
    pub fn len(&self, key: &str) -> usize {
        self.entries
            .lock()
            .map(|map| map.get(key).map_or(0, |e| e.members.len()))
            .unwrap_or(0)
    }

    fn slide_locked(
        &self,
        key: &str,
        window_start_micros: i64,
        now_micros: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| StoreError::Command(format!("store lock poisoned: {e}")))?;

        let entry = map.entry(key.to_string()).or_default();
        if entry.expires_at_micros != 0 && entry.expires_at_micros <= now_micros {
            entry.members.clear();
        }

        entry.members.retain(|(score, _)| *score >= window_start_micros);
        let count = entry.members.len() as u64;

        let at = entry.members.partition_point(|(score, _)| *score <= now_micros);
        entry.members.insert(at, (now_micros, member.to_string()));

        let ttl_micros = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
        entry.expires_at_micros = now_micros.saturating_add(ttl_micros);
        Ok(count)
    }
}

impl CounterStore for MemoryCounterStore {
    async fn slide(
        &self,
        key: &str,
        window_start_micros: i64,
        now_micros: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(StoreError::Unreachable("memory store switched off".into()));
        }
        self.slide_locked(key, window_start_micros, now_micros, member, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn counts_before_adding() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.slide("k", 0, 10, "a", TTL).await.unwrap(), 0);
        assert_eq!(store.slide("k", 0, 11, "b", TTL).await.unwrap(), 1);
        assert_eq!(store.len("k"), 2);
    }

    #[tokio::test]
    async fn prune_keeps_members_at_window_start() {
        let store = MemoryCounterStore::new();
        store.slide("k", 0, 100, "a", TTL).await.unwrap();
        store.slide("k", 0, 200, "b", TTL).await.unwrap();
        // Strictly below 200 goes, 200 itself stays.
        assert_eq!(store.slide("k", 200, 300, "c", TTL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_key_starts_over() {
        let store = MemoryCounterStore::new();
        store.slide("k", 0, 0, "a", Duration::from_micros(50)).await.unwrap();
        assert_eq!(store.slide("k", i64::MIN, 50, "b", TTL).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_reports_error() {
        let store = MemoryCounterStore::new();
        store.set_unreachable(true);
        let err = store.slide("k", 0, 1, "a", TTL).await.unwrap_err();
        assert!(matches!(err, StoreError::Unreachable(_)));
        assert_eq!(store.len("k"), 0);
    }
}
