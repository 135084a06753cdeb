use crate::error::TableHubError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};
use tracing::debug;

type KeyLock = Arc<AsyncRwLock<()>>;

/// Lazily-created reader/writer lock per key (table identifier).
///
/// Entries are registered on first use and never removed. Registration is
/// double-checked: a shared lookup first, then an insert-if-absent under
/// the exclusive registry guard, so two racing first callers always end up
/// holding the same lock object.
pub struct KeyLockRegistry {
    locks: RwLock<HashMap<String, KeyLock>>,
    timeout: Option<Duration>,
}

impl KeyLockRegistry {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    fn lock_for(&self, key: &str) -> KeyLock {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Exclusive lock: excludes every other holder of `key`.
    pub async fn lock(&self, key: &str) -> Result<KeyWriteGuard, TableHubError> {
        let lock = self.lock_for(key);
        let guard = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock.write_owned())
                .await
                .map_err(|_| TableHubError::LockTimeout {
                    key: key.to_string(),
                })?,
            None => lock.write_owned().await,
        };
        debug!(key, mode = "exclusive", "key lock acquired");
        Ok(KeyWriteGuard { _guard: guard })
    }

    /// Shared lock: concurrent with other shared holders, excluded by an
    /// exclusive one.
    pub async fn read(&self, key: &str) -> Result<KeyReadGuard, TableHubError> {
        let lock = self.lock_for(key);
        let guard = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock.read_owned())
                .await
                .map_err(|_| TableHubError::LockTimeout {
                    key: key.to_string(),
                })?,
            None => lock.read_owned().await,
        };
        debug!(key, mode = "shared", "key lock acquired");
        Ok(KeyReadGuard { _guard: guard })
    }

    /// Number of keys that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

impl Default for KeyLockRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Held exclusive lock; released on drop (every exit path, unwinding included).
pub struct KeyWriteGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl KeyWriteGuard {
    pub fn release(self) {}
}

pub struct KeyReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

impl KeyReadGuard {
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::KeyLockRegistry;
    use crate::error::TableHubError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn racing_first_lookups_share_one_lock() {
        let registry = Arc::new(KeyLockRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.lock_for("t_same") })
            })
            .collect();
        let mut locks = Vec::new();
        for h in handles {
            locks.push(h.await.expect("join"));
        }
        assert!(locks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exclusive_holders_never_overlap() {
        let registry = Arc::new(KeyLockRegistry::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                tokio::spawn(async move {
                    let guard = registry.lock("t_a").await.expect("lock");
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    guard.release();
                })
            })
            .collect();
        for h in handles {
            h.await.expect("join");
        }
    }

    #[tokio::test]
    async fn shared_holders_coexist_but_block_writers() {
        let registry = KeyLockRegistry::new(Some(Duration::from_millis(50)));
        let r1 = registry.read("t_a").await.expect("r1");
        let r2 = registry.read("t_a").await.expect("r2");
        let err = registry.lock("t_a").await.err().expect("writer must time out");
        assert!(matches!(err, TableHubError::LockTimeout { ref key } if key == "t_a"));
        drop(r1);
        drop(r2);
        registry.lock("t_a").await.expect("writer after readers");
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let registry = KeyLockRegistry::new(Some(Duration::from_millis(50)));
        let _a = registry.lock("t_a").await.expect("a");
        let _b = registry.lock("t_b").await.expect("b");
        assert_eq!(registry.len(), 2);
    }
}
