//! Read-only inventory views for dashboards and reporting.
//!
//! These read committed snapshots and take no row locks, so a view may lag a
//! concurrent unit of work by one commit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use partsledger_core::{ProductId, SupplierId};
use partsledger_inventory::{DEFAULT_REORDER_POINT, InventoryRecord, LedgerEntry, SerialCounts};
use partsledger_products::Product;

use crate::catalog::ProductCatalog;
use crate::catalog_guard::require_product;
use crate::error::LedgerResult;
use crate::store::LedgerStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub products_with_inventory: u64,
    pub total_units: i64,
    pub low_stock: u64,
    pub out_of_stock: u64,
    pub serials: SerialCounts,
}

/// A catalog product joined with its stock position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductInventory {
    pub product: Product,
    pub stock: i64,
    pub reorder_point: i64,
    pub supplier_id: Option<SupplierId>,
    pub last_restock_date: Option<DateTime<Utc>>,
    /// Serials that could be sold right now (`available` or `returned`).
    pub available_serials: u64,
    pub low_stock: bool,
    pub out_of_stock: bool,
}

impl ProductInventory {
    fn join(product: Product, record: Option<&InventoryRecord>, serials: Option<&SerialCounts>) -> Self {
        let stock = record.map_or(0, |r| r.stock);
        let reorder_point = record.map_or(DEFAULT_REORDER_POINT, |r| r.reorder_point);
        Self {
            product,
            stock,
            reorder_point,
            supplier_id: record.and_then(|r| r.supplier_id),
            last_restock_date: record.and_then(|r| r.last_restock_date),
            available_serials: serials.map_or(0, SerialCounts::on_hand),
            low_stock: stock > 0 && stock <= reorder_point,
            out_of_stock: stock == 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InventoryQueries<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> InventoryQueries<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> InventoryQueries<S, C>
where
    S: LedgerStore,
    C: ProductCatalog,
{
    pub async fn stats(&self) -> LedgerResult<InventoryStats> {
        let records = self.store.inventory_records().await?;
        let mut stats = InventoryStats {
            products_with_inventory: records.len() as u64,
            ..InventoryStats::default()
        };
        for record in &records {
            stats.total_units += record.stock;
            if record.is_low_stock() {
                stats.low_stock += 1;
            }
            if record.is_out_of_stock() {
                stats.out_of_stock += 1;
            }
        }
        for counts in self.store.serial_counts().await?.values() {
            stats.serials.merge(counts);
        }
        Ok(stats)
    }

    /// Every catalog product, including those never stocked.
    pub async fn products_with_inventory(&self) -> LedgerResult<Vec<ProductInventory>> {
        let records: HashMap<ProductId, InventoryRecord> = self
            .store
            .inventory_records()
            .await?
            .into_iter()
            .map(|r| (r.product_id, r))
            .collect();
        let serials = self.store.serial_counts().await?;

        Ok(self
            .catalog
            .list()
            .await?
            .into_iter()
            .map(|product| {
                let id = product.id;
                ProductInventory::join(product, records.get(&id), serials.get(&id))
            })
            .collect())
    }

    /// Stocked products at or below their reorder point, lowest stock first.
    pub async fn low_stock(&self) -> LedgerResult<Vec<ProductInventory>> {
        let mut low: Vec<ProductInventory> = self
            .products_with_inventory()
            .await?
            .into_iter()
            .filter(|p| p.low_stock)
            .collect();
        low.sort_by_key(|p| p.stock);
        Ok(low)
    }

    /// Audit trail for one product, oldest first.
    pub async fn transaction_history(&self, product_id: ProductId) -> LedgerResult<Vec<LedgerEntry>> {
        require_product(&self.catalog, product_id).await?;
        Ok(self.store.transactions_for_product(product_id).await?)
    }
}
