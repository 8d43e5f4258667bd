use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use partsledger_core::{ProductId, SaleId};
use partsledger_inventory::{InventoryRecord, LedgerEntry, SerialCounts, SerialNumber, SerialStatus};
use partsledger_sales::{ReturnRecord, Sale};

use super::locks::{HeldLocks, LockTable};
use super::{LedgerStore, LockKey, LockSet, UnitOfWork};
use crate::error::StoreError;

/// Default upper bound for acquiring a unit's locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LedgerState {
    inventory: HashMap<ProductId, InventoryRecord>,
    serials: HashMap<String, SerialNumber>,
    transactions: Vec<LedgerEntry>,
    sales: HashMap<SaleId, Sale>,
    returns: Vec<ReturnRecord>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev and single-process deployments. Row locks come from
/// a [`LockTable`]; committed state sits behind one `RwLock` that is only
/// write-locked for the instant a unit publishes its staged writes.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    locks: LockTable,
    sale_sequence: Arc<AtomicU64>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            locks: LockTable::new(),
            sale_sequence: Arc::new(AtomicU64::new(0)),
            lock_timeout,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("ledger state poisoned".to_string()))?;
        Ok(f(&state))
    }
}

#[derive(Debug, Default)]
struct Staged {
    inventory: HashMap<ProductId, InventoryRecord>,
    serials: HashMap<String, SerialNumber>,
    transactions: Vec<LedgerEntry>,
    /// `None` marks a deletion.
    sales: HashMap<SaleId, Option<Sale>>,
    returns: Vec<ReturnRecord>,
}

struct InMemoryUnit {
    state: Arc<RwLock<LedgerState>>,
    sale_sequence: Arc<AtomicU64>,
    locks: LockSet,
    staged: Staged,
    _held: HeldLocks,
}

impl InMemoryUnit {
    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("ledger state poisoned".to_string()))?;
        Ok(f(&state))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    fn locks(&self) -> &LockSet {
        &self.locks
    }

    async fn inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        self.locks.ensure(&LockKey::Product(product_id))?;
        if let Some(staged) = self.staged.inventory.get(&product_id) {
            return Ok(Some(staged.clone()));
        }
        self.read(|s| s.inventory.get(&product_id).cloned())
    }

    async fn put_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Product(record.product_id))?;
        self.staged.inventory.insert(record.product_id, record.clone());
        Ok(())
    }

    async fn serial(&mut self, serial: &str) -> Result<Option<SerialNumber>, StoreError> {
        self.locks.ensure(&LockKey::Serial(serial.to_string()))?;
        if let Some(staged) = self.staged.serials.get(serial) {
            return Ok(Some(staged.clone()));
        }
        self.read(|s| s.serials.get(serial).cloned())
    }

    async fn put_serial(&mut self, serial: &SerialNumber) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Serial(serial.serial.clone()))?;
        self.staged.serials.insert(serial.serial.clone(), serial.clone());
        Ok(())
    }

    async fn append_transaction(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Product(entry.product_id))?;
        self.staged.transactions.push(entry.clone());
        Ok(())
    }

    async fn sale(&mut self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        self.locks.ensure(&LockKey::Sale(sale_id))?;
        if let Some(staged) = self.staged.sales.get(&sale_id) {
            return Ok(staged.clone());
        }
        self.read(|s| s.sales.get(&sale_id).cloned())
    }

    async fn put_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(sale.id))?;
        self.staged.sales.insert(sale.id, Some(sale.clone()));
        Ok(())
    }

    async fn delete_sale(&mut self, sale_id: SaleId) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(sale_id))?;
        self.staged.sales.insert(sale_id, None);
        Ok(())
    }

    async fn put_return(&mut self, record: &ReturnRecord) -> Result<(), StoreError> {
        self.locks.ensure(&LockKey::Sale(record.sale_id))?;
        self.staged.returns.push(record.clone());
        Ok(())
    }

    async fn next_sale_sequence(&mut self) -> Result<u64, StoreError> {
        Ok(self.sale_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnit {
            state,
            staged,
            _held,
            ..
        } = *self;

        let mut state = state
            .write()
            .map_err(|_| StoreError::Backend("ledger state poisoned".to_string()))?;

        state.inventory.extend(staged.inventory);
        state.serials.extend(staged.serials);
        state.transactions.extend(staged.transactions);
        for (id, sale) in staged.sales {
            match sale {
                Some(sale) => {
                    state.sales.insert(id, sale);
                }
                None => {
                    state.sales.remove(&id);
                    state.returns.retain(|r| r.sale_id != id);
                }
            }
        }
        state.returns.extend(staged.returns);

        // Row locks are released only after the write lock, so the next
        // holder of a row always reads the published state.
        drop(state);
        drop(_held);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self, locks: LockSet) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let held = self.locks.acquire(&locks, self.lock_timeout).await?;
        Ok(Box::new(InMemoryUnit {
            state: self.state.clone(),
            sale_sequence: self.sale_sequence.clone(),
            locks,
            staged: Staged::default(),
            _held: held,
        }))
    }

    async fn inventory_record(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        self.read(|s| s.inventory.get(&product_id).cloned())
    }

    async fn inventory_records(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        self.read(|s| s.inventory.values().cloned().collect())
    }

    async fn serial(&self, serial: &str) -> Result<Option<SerialNumber>, StoreError> {
        self.read(|s| s.serials.get(serial).cloned())
    }

    async fn serials_for_product(
        &self,
        product_id: ProductId,
        status: Option<SerialStatus>,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        self.read(|s| {
            let mut serials: Vec<SerialNumber> = s
                .serials
                .values()
                .filter(|sn| sn.product_id == product_id)
                .filter(|sn| status.is_none_or(|st| sn.status == st))
                .cloned()
                .collect();
            serials.sort_by(|a, b| a.serial.cmp(&b.serial));
            serials
        })
    }

    async fn serial_counts(&self) -> Result<HashMap<ProductId, SerialCounts>, StoreError> {
        self.read(|s| {
            let mut counts: HashMap<ProductId, SerialCounts> = HashMap::new();
            for sn in s.serials.values() {
                counts.entry(sn.product_id).or_default().record(sn.status);
            }
            counts
        })
    }

    async fn transactions_for_product(&self, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.read(|s| {
            s.transactions
                .iter()
                .filter(|e| e.product_id == product_id)
                .cloned()
                .collect()
        })
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        self.read(|s| s.sales.get(&sale_id).cloned())
    }

    async fn returns_for_sale(&self, sale_id: SaleId) -> Result<Vec<ReturnRecord>, StoreError> {
        self.read(|s| {
            s.returns
                .iter()
                .filter(|r| r.sale_id == sale_id)
                .cloned()
                .collect()
        })
    }

    async fn sales_referencing_product(&self, product_id: ProductId) -> Result<Vec<SaleId>, StoreError> {
        self.read(|s| {
            let mut ids: Vec<SaleId> = s
                .sales
                .values()
                .filter(|sale| sale.references_product(product_id))
                .map(|sale| sale.id)
                .collect();
            ids.sort();
            ids
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partsledger_core::UserId;
    use partsledger_inventory::TransactionType;

    #[tokio::test]
    async fn dropped_unit_leaves_no_trace() {
        let store = InMemoryLedgerStore::new();
        let product_id = ProductId::new();

        {
            let mut uow = store.begin(LockSet::new().product(product_id)).await.unwrap();
            let mut record = InventoryRecord::new(product_id);
            record.apply_delta(5).unwrap();
            uow.put_inventory(&record).await.unwrap();
            let entry = LedgerEntry::new(&record, TransactionType::In, 5, UserId::new(), Utc::now()).unwrap();
            uow.append_transaction(&entry).await.unwrap();
            // dropped without commit
        }

        assert!(store.inventory_record(product_id).await.unwrap().is_none());
        assert!(store.transactions_for_product(product_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_writes_are_visible_together() {
        let store = InMemoryLedgerStore::new();
        let product_id = ProductId::new();

        let mut uow = store.begin(LockSet::new().product(product_id)).await.unwrap();
        let mut record = InventoryRecord::new(product_id);
        record.apply_delta(3).unwrap();
        uow.put_inventory(&record).await.unwrap();
        uow.append_transaction(
            &LedgerEntry::new(&record, TransactionType::In, 3, UserId::new(), Utc::now()).unwrap(),
        )
        .await
        .unwrap();

        // Staged reads see the unit's own writes, snapshots do not.
        assert_eq!(uow.inventory(product_id).await.unwrap().unwrap().stock, 3);
        assert!(store.inventory_record(product_id).await.unwrap().is_none());

        uow.commit().await.unwrap();
        assert_eq!(store.inventory_record(product_id).await.unwrap().unwrap().stock, 3);
        assert_eq!(store.transactions_for_product(product_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_outside_the_lock_set_are_refused() {
        let store = InMemoryLedgerStore::new();
        let mut uow = store.begin(LockSet::new().product(ProductId::new())).await.unwrap();
        let stranger = InventoryRecord::new(ProductId::new());
        let err = uow.put_inventory(&stranger).await.unwrap_err();
        assert!(matches!(err, StoreError::Unlocked(_)));
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_contention() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let product_id = ProductId::new();
        let _first = store.begin(LockSet::new().product(product_id)).await.unwrap();
        let err = store.begin(LockSet::new().product(product_id)).await.err().unwrap();
        assert!(matches!(err, StoreError::Contention(_)));
    }
}
