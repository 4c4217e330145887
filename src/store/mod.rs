//! Key-value store seam used by the single-flight protocol.
//!
//! The protocol only needs an atomic, expiring conditional `SET`, a `GET`,
//! and a `DEL` (optionally guarded by the value the caller wrote).  [`keydb::KeyDbStore`] provides
//! them over a `fred` connection pool; [`memory::MemoryStore`] provides them
//! in-process with the same TTL semantics.

pub mod keydb;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use keydb::KeyDbStore;
pub use memory::MemoryStore;

/// Options for [`KeyValueStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Expiry applied to the key when the write succeeds.
    pub expire: Duration,
    /// Only write when the key does not exist (`NX`).
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Unconditional write with an expiry (`SET key value PX ms`).
    pub fn expiring(expire: Duration) -> Self {
        Self {
            expire,
            only_if_absent: false,
        }
    }

    /// Conditional write with an expiry (`SET key value PX ms NX`).
    pub fn only_if_absent(expire: Duration) -> Self {
        Self {
            expire,
            only_if_absent: true,
        }
    }
}

/// Failure reported by a store backend.
///
/// KeyDB errors are carried as-is so callers can inspect the client's own
/// error kind.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    KeyDb(#[from] fred::error::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal store contract consumed by the coordinator.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write `value` at `key`.  Returns `true` if the write happened, `false`
    /// if `only_if_absent` was requested and the key already existed.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError>;

    /// Read the value at `key`, or `None` if it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`.  Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete `key` only while it still holds `expected`.  Returns `true` if
    /// the key was deleted.
    ///
    /// The default is a `GET` followed by a `DEL` and is not atomic; backends
    /// that can compare and delete in one step should override it.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        if self.get(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.delete(key).await?;
        Ok(true)
    }
}
