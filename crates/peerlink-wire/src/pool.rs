//! Keyed pool with single-flight creation.
//!
//! Reads go straight to the [`DashMap`]. Creation takes one pool-wide lock and
//! re-checks the map under it, so concurrent callers asking for the same key
//! run the creation closure at most once.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entries that can go stale while pooled.
pub trait Poolable {
    fn is_closed(&self) -> bool;

    /// Release whatever the entry still holds. Called when a stale entry is
    /// evicted; must tolerate an entry that is already closed.
    fn close(&self);
}

/// Concurrent map of pooled entries with at most one creation in flight.
pub struct SessionPool<K, V> {
    entries: DashMap<K, Arc<V>>,
    create_lock: Mutex<()>,
}

impl<K, V> SessionPool<K, V>
where
    K: Eq + Hash + Clone,
    V: Poolable,
{
    /// Empty pool.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Live entry for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|value| !value.is_closed())
    }

    /// Return the live entry for `key`, creating it with `create` if needed.
    ///
    /// A closed entry is replaced. If `create` yields `None` nothing is
    /// inserted and `None` is returned.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: &K, create: F) -> Option<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Arc<V>>>,
    {
        if let Some(value) = self.get(key) {
            return Some(value);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(value) = self.get(key) {
            return Some(value);
        }
        if let Some((_, stale)) = self.entries.remove_if(key, |_, value| value.is_closed()) {
            stale.close();
        }

        let value = create().await?;
        self.entries.insert(key.clone(), Arc::clone(&value));
        Some(value)
    }

    /// Take the entry for `key` out of the pool without closing it.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<Arc<V>> {
        let keys: Vec<K> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Number of pooled entries, closed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for SessionPool<K, V>
where
    K: Eq + Hash + Clone,
    V: Poolable,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Entry {
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    impl Poolable for Entry {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_creation() {
        let pool = Arc::new(SessionPool::<String, Entry>::new());
        let creations = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = Arc::clone(&pool);
            let creations = Arc::clone(&creations);
            tasks.push(tokio::spawn(async move {
                pool.get_or_try_insert_with(&"peer".to_string(), || async move {
                    creations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some(Arc::new(Entry::default()))
                })
                .await
                .unwrap()
            }));
        }

        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(seen.iter().all(|entry| Arc::ptr_eq(entry, &seen[0])));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_inserts_nothing() {
        let pool = SessionPool::<u16, Entry>::new();
        assert!(pool.get_or_try_insert_with(&1, || async { None }).await.is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_closed_entry_is_replaced() {
        let pool = SessionPool::<u16, Entry>::new();
        let first = pool
            .get_or_try_insert_with(&1, || async { Some(Arc::new(Entry::default())) })
            .await
            .unwrap();
        first.closed.store(true, Ordering::SeqCst);
        assert!(pool.get(&1).is_none());

        let second = pool
            .get_or_try_insert_with(&1, || async { Some(Arc::new(Entry::default())) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_closed_even_when_replacement_fails() {
        let pool = SessionPool::<u16, Entry>::new();
        let stale = pool
            .get_or_try_insert_with(&1, || async { Some(Arc::new(Entry::default())) })
            .await
            .unwrap();
        stale.closed.store(true, Ordering::SeqCst);

        assert!(pool.get_or_try_insert_with(&1, || async { None }).await.is_none());
        assert_eq!(stale.close_calls.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_drain_empties_the_pool() {
        let pool = SessionPool::<u16, Entry>::new();
        for key in 1..=3 {
            pool.get_or_try_insert_with(&key, || async { Some(Arc::new(Entry::default())) })
                .await;
        }
        assert_eq!(pool.drain().len(), 3);
        assert!(pool.is_empty());
    }
}
