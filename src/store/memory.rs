//! In-process [`KeyValueStore`] with KeyDB-like expiry.
//!
//! Expiry is measured on the tokio clock, so tests running with a paused
//! runtime see keys expire exactly when the clock is advanced past their TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use super::{KeyValueStore, SetOptions, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Shared in-memory store.  Clones share the same key space.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time-to-live of `key`, or `None` if it is absent or expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if options.only_if_absent && entries.get(key).is_some_and(|e| e.is_live(now)) {
            trace!(%key, "memory SET NX refused");
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + options.expire,
            },
        );
        trace!(%key, expire = ?options.expire, "memory SET");
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if owned {
            entries.remove(key);
        }
        trace!(%key, deleted = owned, "memory DEL if equal");
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn only_if_absent_refuses_live_key() {
        let store = MemoryStore::new();
        let opts = SetOptions::only_if_absent(Duration::from_secs(5));

        assert!(store.set("k", "first", opts).await.unwrap());
        assert!(!store.set("k", "second", opts).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", SetOptions::expiring(Duration::from_millis(100)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_key_can_be_reacquired() {
        let store = MemoryStore::new();
        let opts = SetOptions::only_if_absent(Duration::from_millis(50));

        assert!(store.set("lock", "a", opts).await.unwrap());
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(store.set("lock", "b", opts).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .set("k", "v", SetOptions::expiring(Duration::from_secs(1)))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_if_equals_spares_other_values() {
        let store = MemoryStore::new();
        let opts = SetOptions::expiring(Duration::from_secs(5));
        store.set("lock", "mine", opts).await.unwrap();

        assert!(!store.delete_if_equals("lock", "theirs").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("mine"));

        assert!(store.delete_if_equals("lock", "mine").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(!store.delete_if_equals("lock", "mine").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_reports_remaining_time() {
        let store = MemoryStore::new();
        store
            .set("k", "v", SetOptions::expiring(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(6)));
    }
}
