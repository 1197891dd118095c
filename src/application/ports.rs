//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::rate_limit::WindowCount;
use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Port for obtaining current time.
///
/// Monotonic time drives circuit cooldowns; wall-clock time drives rate limit
/// windows, whose reset times are sent to clients.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;

    /// Get the current wall-clock time.
    fn system_time(&self) -> SystemTime;
}

/// Port for concurrent in-process key-value storage.
///
/// Every mutation runs with exclusive access to its entry, so read-modify-write
/// sequences on the same key never lose updates.
/// Infrastructure provides concrete implementations (ShardedStorage).
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets mutable access to the value
    ///
    /// # Returns
    /// The result from the accessor function
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Read an existing entry without creating it.
    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Iterate over all entries, providing access to both key and value.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Failure talking to the remote key-value backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The operation did not complete within its deadline
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// The backend could not be reached
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The backend rejected or failed the command
    #[error("store command failed: {0}")]
    Command(String),
}

/// Port for the shared remote store (cache entries and rate limit counters).
///
/// This is the only point of cross-instance coordination. Implementations
/// must bound every call with a timeout and report it as `StoreError::Timeout`.
#[async_trait]
pub trait KvStore: Send + Sync + Debug {
    /// Read a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a raw value with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key. Deleting a missing key succeeds.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment a window counter and set its expiry if unset.
    ///
    /// The increment and the expiry must be applied as one unit so a count
    /// is never observable without its expiry.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;
}
