use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::domain::ItemKey;

/// Recently delivered items, so repeats inside the TTL are answered from cache.
///
/// Expiry is lazy: stale entries are dropped when looked up, and swept in bulk
/// on insert once the map grows past `max_entries`. Not an LRU.
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<ItemKey, Instant>>,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_recent(&self, key: &ItemKey) -> bool {
        self.is_recent_at(key, Instant::now())
    }

    pub fn is_recent_at(&self, key: &ItemKey, now: Instant) -> bool {
        let mut map = self.lock();
        let Some(&ts) = map.get(key) else {
            return false;
        };
        if now.saturating_duration_since(ts) > self.ttl {
            map.remove(key);
            return false;
        }
        true
    }

    pub fn mark_downloaded(&self, key: ItemKey) {
        self.mark_downloaded_at(key, Instant::now());
    }

    pub fn mark_downloaded_at(&self, key: ItemKey, now: Instant) {
        let mut map = self.lock();
        map.insert(key, now);
        if map.len() > self.max_entries {
            let ttl = self.ttl;
            map.retain(|_, ts| now.saturating_duration_since(*ts) <= ttl);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemKey, Instant>> {
        // A poisoned map only means a panic mid-insert; the data is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
