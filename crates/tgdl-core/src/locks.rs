use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::ItemKey;

type Registry = Mutex<HashMap<ItemKey, Arc<AsyncMutex<()>>>>;

/// Per-item mutual exclusion, created lazily and dropped when no longer used.
///
/// A `/dl` racing a batch on the same post waits here instead of downloading
/// twice.
#[derive(Default)]
pub struct ItemLocks {
    inner: Arc<Registry>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it.
    pub async fn acquire(&self, key: ItemKey) -> ItemGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        // If this future is dropped while waiting, the cloned Arc goes with it and
        // the entry is collected by the next release.
        let guard = lock.lock_owned().await;
        ItemGuard {
            key,
            guard: Some(guard),
            registry: Arc::clone(&self.inner),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held item lock. Released on drop.
pub struct ItemGuard {
    key: ItemKey,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<Registry>,
}

impl ItemGuard {
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        // Unlock first so the strong count below only counts the map and waiters.
        self.guard.take();

        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let unused = map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if unused {
            map.remove(&self.key);
        }
    }
}
