//! Keyed TTL cache for read-heavy lookups.
//!
//! Entries are timestamped on insert and evicted lazily on read. Writers
//! that affect a cached range call `invalidate` with the exact key before
//! returning; invalidation is exact-key only.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A thread-safe cache with a fixed per-entry time-to-live.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a live entry, evicting it if expired. A poisoned lock is
    /// treated as a miss; the caller falls back to the source of truth.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some((inserted, value)) if inserted.elapsed() < self.ttl => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired entry observed under the read lock; drop it.
        if let Ok(mut entries) = self.entries.write() {
            if let Some((inserted, _)) = entries.get(key) {
                if inserted.elapsed() >= self.ttl {
                    entries.remove(key);
                }
            }
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, (Instant::now(), value));
        }
    }

    /// Remove one key. Call before returning from any write that affects it.
    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Number of stored entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
