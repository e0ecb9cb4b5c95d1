//! Keyed async mutexes.
//!
//! Archive and restore of the same session must not interleave, while work on
//! different sessions runs in parallel. Each key gets its own
//! `tokio::sync::Mutex`, created on first use and dropped from the map once
//! nobody holds or waits on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Default)]
pub struct KeyLocks {
    map: Arc<LockMap>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyLockGuard {
        let mutex = {
            let mut map = self.map.lock();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        KeyLockGuard {
            key: key.to_string(),
            guard: Some(guard),
            map: self.map.clone(),
        }
    }

    /// Whether `key` is held or waited on right now.
    pub fn is_held(&self, key: &str) -> bool {
        self.map.lock().contains_key(key)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while a keyed operation runs.
pub struct KeyLockGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<LockMap>,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        drop(self.guard.take());
        let mut map = self.map.lock();
        if let Some(entry) = map.get(&self.key) {
            if Arc::strong_count(entry) == 1 {
                map.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_reclaimed_when_idle() {
        let locks = KeyLocks::new();
        {
            let guard = locks.lock("agent:main:main").await;
            assert_eq!(guard.key(), "agent:main:main");
            assert_eq!(locks.len(), 1);
            assert!(locks.is_held("agent:main:main"));
            assert!(!locks.is_held("other"));
        }
        assert!(locks.is_empty());
        assert!(!locks.is_held("agent:main:main"));
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _g = locks.lock("s1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock("b")).await;
        assert!(b.is_ok());
    }
}
