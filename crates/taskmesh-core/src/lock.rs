//! Per-instance in-process locking.
//!
//! The state machine requires that all mutations of a given instance (or of
//! its workflow lead, if it has one) are totally ordered. This table hands
//! out the same `Arc<Mutex<()>>` for a given lock key every time, so two
//! concurrent callers operating on the same instance always contend on one
//! mutex rather than racing past each other. It is the process-local half of
//! the two-guard scheme — the other half is the database row lock taken in
//! the same transaction (see `taskmesh-store`'s `FOR UPDATE` reads).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Intern table mapping a lock key (`wnstanceId ?? instanceId`) to a shared
/// mutex. Entries are never evicted; the table grows to the number of
/// distinct instances/workflows seen, which is bounded by the job catalog's
/// size, not by request volume.
#[derive(Default)]
pub struct InstanceLockTable {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl InstanceLockTable {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn handle(&self, key: i64) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire the lock for `key`, waiting if another caller currently holds
    /// it. `key` should be `wnstance_id.unwrap_or(instance_id)`.
    pub async fn lock(&self, key: i64) -> InstanceLockGuardOwned {
        let handle = self.handle(key);
        let guard = handle.lock_owned().await;
        InstanceLockGuardOwned { _guard: guard }
    }
}

/// Owned variant of the guard (holds its own `Arc` so it can outlive the
/// `.lock()` call's stack frame, which async state-machine methods need).
pub struct InstanceLockGuardOwned {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_concurrent_callers() {
        let table = Arc::new(InstanceLockTable::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock(42).await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let table = Arc::new(InstanceLockTable::new());
        let g1 = table.lock(1).await;
        let g2 = table.lock(2).await;
        drop(g1);
        drop(g2);
    }
}
