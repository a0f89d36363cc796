//! # Time-Bounded Cache
//!
//! Owned by the runtime container and passed to its consumers; there is no
//! process-wide instance.
//!
//! - Entries expire `ttl` after insertion
//! - Expired entries are dropped on lookup and by periodic garbage collection
//! - Garbage collection runs on insert, at most once per `gc_interval`

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    last_gc: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    gc_interval: Duration,
    state: Mutex<State<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, gc_interval: Duration) -> Self {
        Self {
            ttl,
            gc_interval,
            state: Mutex::new(State {
                entries: HashMap::new(),
                last_gc: Instant::now(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.last_gc) >= self.gc_interval {
            Self::collect(&mut state, now);
        }
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Cached value, or the result of `load` cached for the next `ttl`.
    /// Failed loads are not cached.
    pub fn get_or_try_insert_with<E>(&self, key: K, load: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.state.lock().entries.remove(key).map(|entry| entry.value)
    }

    /// Drop expired entries; returns how many were dropped.
    pub fn garbage_collect(&self) -> usize {
        let mut state = self.state.lock();
        Self::collect(&mut state, Instant::now())
    }

    /// Entries held, expired ones included until collected.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect(state: &mut State<K, V>, now: Instant) -> usize {
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.last_gc = now;
        before - state.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(10), Duration::from_secs(60));
        cache.insert("a", 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_collects_expired_entries() {
        let cache = TtlCache::new(Duration::from_secs(5), Duration::from_secs(10));
        cache.insert("a", 1);
        cache.insert("b", 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("c", 3);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_not_cached() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(5), Duration::from_secs(10));

        let failed: Result<u32, &str> = cache.get_or_try_insert_with("a", || Err("down"));
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let loaded: Result<u32, &str> = cache.get_or_try_insert_with("a", || Ok(7));
        assert_eq!(loaded, Ok(7));
        let cached: Result<u32, &str> = cache.get_or_try_insert_with("a", || Ok(8));
        assert_eq!(cached, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_collect_counts() {
        let cache = TtlCache::new(Duration::from_secs(1), Duration::from_secs(60));
        cache.insert(1, "x");
        cache.insert(2, "y");
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.garbage_collect(), 2);
        assert_eq!(cache.remove(&1), None);
    }
}
