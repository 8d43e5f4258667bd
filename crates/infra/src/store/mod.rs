//! Ledger storage boundary.
//!
//! Every stock, serial, sale and return mutation runs inside one
//! [`UnitOfWork`] opened by [`LedgerStore::begin`]. A unit holds exclusive
//! locks on every row it names for its whole lifetime, so read-modify-write
//! sequences cannot lose updates, and it publishes all of its writes together
//! at [`UnitOfWork::commit`]. Dropping a unit without committing discards
//! everything it staged.
//!
//! ## Lock ordering
//!
//! Lock keys live in a [`LockSet`] (a sorted set), and backends acquire them
//! in that order. Two units therefore always request shared rows in the same
//! global order and cannot deadlock. Units with disjoint lock sets proceed in
//! parallel.
//!
//! ## Snapshot reads
//!
//! The read methods on [`LedgerStore`] take no row locks and return committed
//! state only. They back reporting and the "which rows do I need to lock"
//! planning step of the coordinators.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use partsledger_core::{ProductId, SaleId};
use partsledger_inventory::{InventoryRecord, LedgerEntry, SerialCounts, SerialNumber, SerialStatus};
use partsledger_sales::{ReturnRecord, Sale};

use crate::error::StoreError;

pub mod in_memory;
pub mod locks;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use locks::LockTable;
pub use postgres::PostgresLedgerStore;

/// One lockable row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// The inventory record of a product.
    Product(ProductId),
    Sale(SaleId),
    /// A serial number (normalized form).
    Serial(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Product(id) => write!(f, "product:{id}"),
            LockKey::Sale(id) => write!(f, "sale:{id}"),
            LockKey::Serial(s) => write!(f, "serial:{s}"),
        }
    }
}

/// Sorted, de-duplicated set of rows a unit of work locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet(BTreeSet<LockKey>);

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(mut self, id: ProductId) -> Self {
        self.0.insert(LockKey::Product(id));
        self
    }

    pub fn sale(mut self, id: SaleId) -> Self {
        self.0.insert(LockKey::Sale(id));
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.0.insert(LockKey::Serial(serial.into()));
        self
    }

    pub fn insert(&mut self, key: LockKey) {
        self.0.insert(key);
    }

    pub fn contains(&self, key: &LockKey) -> bool {
        self.0.contains(key)
    }

    /// Keys in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = &LockKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail with `Unlocked` unless `key` is part of this set.
    pub fn ensure(&self, key: &LockKey) -> Result<(), StoreError> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(StoreError::Unlocked(key.to_string()))
        }
    }
}

impl FromIterator<LockKey> for LockSet {
    fn from_iter<I: IntoIterator<Item = LockKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<LockKey> for LockSet {
    fn extend<I: IntoIterator<Item = LockKey>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// One serialized, all-or-nothing unit of work.
///
/// Reads see this unit's own staged writes. Reads and writes of inventory,
/// serial and sale rows require the matching [`LockKey`] in the unit's lock
/// set and fail with [`StoreError::Unlocked`] otherwise. Ledger entries and
/// return records are append-only and need no lock of their own; callers
/// hold the product or sale lock they belong to.
#[async_trait]
pub trait UnitOfWork: Send {
    fn locks(&self) -> &LockSet;

    async fn inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError>;

    async fn put_inventory(&mut self, record: &InventoryRecord) -> Result<(), StoreError>;

    async fn serial(&mut self, serial: &str) -> Result<Option<SerialNumber>, StoreError>;

    async fn put_serial(&mut self, serial: &SerialNumber) -> Result<(), StoreError>;

    async fn append_transaction(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn sale(&mut self, sale_id: SaleId) -> Result<Option<Sale>, StoreError>;

    async fn put_sale(&mut self, sale: &Sale) -> Result<(), StoreError>;

    async fn delete_sale(&mut self, sale_id: SaleId) -> Result<(), StoreError>;

    async fn put_return(&mut self, record: &ReturnRecord) -> Result<(), StoreError>;

    /// Next value of the sale-number sequence. Values skipped by aborted
    /// units are not reused.
    async fn next_sale_sequence(&mut self) -> Result<u64, StoreError>;

    /// Publish every staged write atomically and release the locks.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Ledger persistence: unit-of-work factory plus snapshot reads.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work holding exclusive locks on `locks`.
    ///
    /// Fails with [`StoreError::Contention`] when the locks cannot be acquired
    /// within the store's lock timeout; nothing is held after a failure.
    async fn begin(&self, locks: LockSet) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn inventory_record(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError>;

    async fn inventory_records(&self) -> Result<Vec<InventoryRecord>, StoreError>;

    async fn serial(&self, serial: &str) -> Result<Option<SerialNumber>, StoreError>;

    async fn serials_for_product(
        &self,
        product_id: ProductId,
        status: Option<SerialStatus>,
    ) -> Result<Vec<SerialNumber>, StoreError>;

    /// Serial tallies per product.
    async fn serial_counts(&self) -> Result<HashMap<ProductId, SerialCounts>, StoreError>;

    /// Audit trail of one product, oldest first.
    async fn transactions_for_product(&self, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError>;

    async fn returns_for_sale(&self, sale_id: SaleId) -> Result<Vec<ReturnRecord>, StoreError>;

    async fn sales_referencing_product(&self, product_id: ProductId) -> Result<Vec<SaleId>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self, locks: LockSet) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin(locks).await
    }

    async fn inventory_record(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, StoreError> {
        (**self).inventory_record(product_id).await
    }

    async fn inventory_records(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        (**self).inventory_records().await
    }

    async fn serial(&self, serial: &str) -> Result<Option<SerialNumber>, StoreError> {
        (**self).serial(serial).await
    }

    async fn serials_for_product(
        &self,
        product_id: ProductId,
        status: Option<SerialStatus>,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        (**self).serials_for_product(product_id, status).await
    }

    async fn serial_counts(&self) -> Result<HashMap<ProductId, SerialCounts>, StoreError> {
        (**self).serial_counts().await
    }

    async fn transactions_for_product(&self, product_id: ProductId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).transactions_for_product(product_id).await
    }

    async fn sale(&self, sale_id: SaleId) -> Result<Option<Sale>, StoreError> {
        (**self).sale(sale_id).await
    }

    async fn returns_for_sale(&self, sale_id: SaleId) -> Result<Vec<ReturnRecord>, StoreError> {
        (**self).returns_for_sale(sale_id).await
    }

    async fn sales_referencing_product(&self, product_id: ProductId) -> Result<Vec<SaleId>, StoreError> {
        (**self).sales_referencing_product(product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_set_is_sorted_and_deduplicated() {
        let a = ProductId::new();
        let b = ProductId::new();
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        let set = LockSet::new().serial("S-2").product(hi).serial("S-1").product(lo).product(hi);
        let keys: Vec<_> = set.iter().cloned().collect();
        assert_eq!(
            keys,
            vec![
                LockKey::Product(lo),
                LockKey::Product(hi),
                LockKey::Serial("S-1".to_string()),
                LockKey::Serial("S-2".to_string()),
            ]
        );
    }

    #[test]
    fn ensure_reports_missing_key() {
        let set = LockSet::new().product(ProductId::new());
        let err = set.ensure(&LockKey::Serial("X".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Unlocked(msg) if msg == "serial:X"));
    }
}
