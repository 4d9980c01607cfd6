//! Keyed exclusive locks serializing units of work on the same register or
//! open-scope inside one process.
//!
//! Database constraints (unique `open_scope`, unique `(register_id,
//! sequence)`) and the revision bump at the start of each write transaction
//! cover callers living in other processes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
pub(crate) struct LockMap {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockMap {
    /// Waits for exclusive access to `key`. The lock is released when the
    /// guard is dropped.
    pub(crate) async fn acquire(&self, key: String) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots nobody holds or waits on are only referenced by the map.
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) fn register_key(register_id: uuid::Uuid) -> String {
    format!("register:{register_id}")
}

pub(crate) fn scope_key(scope: &str) -> String {
    format!("scope:{scope}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = LockMap::default();
        let guard = locks.acquire("register:a".to_string()).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.acquire("register:a".to_string()).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = LockMap::default();
        let _a = locks.acquire("register:a".to_string()).await;
        let _b = locks.acquire("register:b".to_string()).await;
    }

    #[tokio::test]
    async fn released_slots_are_pruned() {
        let locks = LockMap::default();
        drop(locks.acquire("register:a".to_string()).await);
        let _b = locks.acquire("register:b".to_string()).await;
        assert_eq!(locks.len(), 1);
    }
}
