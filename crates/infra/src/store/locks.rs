use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::{LockKey, LockSet};
use crate::error::StoreError;

/// Guards for every key of one lock set. Dropping releases them and frees
/// the slots no other unit holds or waits on.
#[derive(Debug)]
pub struct HeldLocks {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<LockKey>,
    table: LockTable,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        self.guards.clear();
        self.table.release_idle(&self.keys);
    }
}

/// Process-local table of per-row async mutexes.
///
/// Slots are created on first use and removed once idle. Cloning shares the
/// table.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    slots: Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &LockKey) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| StoreError::Backend("lock table poisoned".to_string()))?;
        Ok(slots.entry(key.clone()).or_default().clone())
    }

    /// Drop slots referenced only by the table. Holders and waiters keep a
    /// clone of the slot, so a busy key is never removed.
    fn release_idle(&self, keys: &[LockKey]) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        for key in keys {
            if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }

    /// Acquire every key of `locks` in set order.
    ///
    /// `timeout` bounds the whole acquisition. On timeout the keys acquired
    /// so far are released and `Contention` is returned.
    pub async fn acquire(&self, locks: &LockSet, timeout: Duration) -> Result<HeldLocks, StoreError> {
        let deadline = Instant::now() + timeout;
        // Built up front so an early return or a cancelled future still
        // frees every slot this call created.
        let mut held = HeldLocks {
            guards: Vec::with_capacity(locks.len()),
            keys: locks.iter().cloned().collect(),
            table: self.clone(),
        };
        for key in locks.iter() {
            let slot = self.slot(key)?;
            let guard = tokio::time::timeout_at(deadline, slot.lock_owned())
                .await
                .map_err(|_| StoreError::Contention(format!("timed out waiting for lock on {key}")))?;
            held.guards.push(guard);
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partsledger_core::ProductId;

    #[tokio::test]
    async fn second_holder_times_out_while_first_holds() {
        let table = LockTable::new();
        let set = LockSet::new().product(ProductId::new());

        let held = table.acquire(&set, Duration::from_millis(50)).await.unwrap();
        let err = table.acquire(&set, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, StoreError::Contention(_)));

        drop(held);
        assert!(table.acquire(&set, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn disjoint_sets_do_not_block() {
        let table = LockTable::new();
        let a = LockSet::new().product(ProductId::new());
        let b = LockSet::new().product(ProductId::new());

        let _held_a = table.acquire(&a, Duration::from_millis(20)).await.unwrap();
        assert!(table.acquire(&b, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_freed() {
        let table = LockTable::new();
        for _ in 0..1_000 {
            let set = LockSet::new().product(ProductId::new()).serial("SN-1");
            let held = table.acquire(&set, Duration::from_millis(20)).await.unwrap();
            assert_eq!(table.slot_count(), 2);
            drop(held);
        }
        assert_eq!(table.slot_count(), 0);
    }

    #[tokio::test]
    async fn busy_slot_survives_a_timed_out_waiter() {
        let table = LockTable::new();
        let set = LockSet::new().product(ProductId::new());

        let held = table.acquire(&set, Duration::from_millis(50)).await.unwrap();
        assert!(table.acquire(&set, Duration::from_millis(10)).await.is_err());
        assert_eq!(table.slot_count(), 1);

        drop(held);
        assert_eq!(table.slot_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_acquisition_frees_its_slots() {
        let table = LockTable::new();
        let blocker = LockSet::new().product(ProductId::new());
        let held = table.acquire(&blocker, Duration::from_millis(50)).await.unwrap();

        let mut wider = blocker.clone();
        wider.insert(LockKey::Serial("SN-9".to_string()));
        let cancelled = tokio::time::timeout(Duration::from_millis(10), table.acquire(&wider, Duration::from_secs(5))).await;
        assert!(cancelled.is_err());

        drop(held);
        assert_eq!(table.slot_count(), 0);
    }
}
