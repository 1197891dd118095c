//! Sharded in-process storage.
//!
//! Backs the circuit table, the local rate limit windows and the metric
//! tables. Each map lives inside one service instance; nothing here is shared
//! across processes.

use crate::application::ports::Storage;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Thread-safe sharded storage backed by DashMap.
///
/// DashMap locks a single shard per write, so mutations on the same key are
/// serialized while unrelated keys proceed in parallel.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Remove a key and return its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, v)| v)
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Collect cloned entries, sorted by key.
    pub fn sorted_entries(&self) -> Vec<(K, V)>
    where
        K: Ord,
        V: Clone,
    {
        let mut entries: Vec<(K, V)> = self
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        let mut value_ref = self.map.entry(key).or_insert_with(factory);
        accessor(&mut value_ref)
    }

    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.map.get(key).map(|value_ref| accessor(&value_ref))
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for entry in self.map.iter() {
            f(entry.key(), entry.value());
        }
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.map.retain(f);
    }
}

// Shared handles delegate to the inner storage
impl<K, V> Storage<K, V> for Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Send + Sync + Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).with_entry_mut(key, factory, accessor)
    }

    fn with_entry<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        (**self).with_entry(key, accessor)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V),
    {
        (**self).for_each(f)
    }

    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        (**self).retain(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_entry_created_on_first_access() {
        let storage: ShardedStorage<String, u64> = ShardedStorage::new();
        assert!(storage.with_entry(&"a".to_string(), |v| *v).is_none());

        let value = storage.with_entry_mut("a".to_string(), || 10, |v| {
            *v += 1;
            *v
        });
        assert_eq!(value, 11);
        assert_eq!(storage.with_entry(&"a".to_string(), |v| *v), Some(11));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_retain_and_clear() {
        let storage: ShardedStorage<u32, u32> = ShardedStorage::new();
        for i in 0..10 {
            storage.with_entry_mut(i, || i, |_| ());
        }
        storage.retain(|_, v| *v % 2 == 0);
        assert_eq!(storage.len(), 5);
        assert!(storage.contains_key(&4));
        assert!(!storage.contains_key(&5));

        storage.clear();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_sorted_entries() {
        let storage: ShardedStorage<String, u32> = ShardedStorage::new();
        for name in ["c", "a", "b"] {
            storage.with_entry_mut(name.to_string(), || 0, |_| ());
        }
        let keys: Vec<String> = storage.sorted_entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let storage = Arc::new(ShardedStorage::<&'static str, u64>::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let storage = Arc::clone(&storage);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    storage.with_entry_mut("hot", || 0, |v| *v += 1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.with_entry(&"hot", |v| *v), Some(1000));
    }
}
