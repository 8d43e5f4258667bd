//! Stock ledger: the single choke point for stock-count mutation.
//!
//! Every change to an [`InventoryRecord`] goes through one of the helpers in
//! this module and is paired with exactly one [`LedgerEntry`] in the same unit
//! of work. The sales and return coordinators call the same helpers inside
//! their own units, so a sale's stock decrements commit or abort together
//! with its serial transitions and the sale row itself.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use partsledger_core::{DomainError, ProductId, SupplierId, UserId};
use partsledger_inventory::{
    InventoryRecord, LedgerEntry, SerialStatus, SerialTransition, StockChange, TransactionType,
    normalize_serial,
};
use partsledger_products::Product;

use crate::catalog::ProductCatalog;
use crate::catalog_guard::require_product;
use crate::error::LedgerResult;
use crate::store::{LedgerStore, LockKey, LockSet, UnitOfWork};

/// Attribution and annotations for one stock movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMeta {
    pub actor: UserId,
    pub notes: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub serial_number: Option<String>,
    pub at: DateTime<Utc>,
}

impl StockMeta {
    pub fn new(actor: UserId, at: DateTime<Utc>) -> Self {
        Self {
            actor,
            notes: None,
            supplier_id: None,
            serial_number: None,
            at,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_supplier(mut self, supplier_id: Option<SupplierId>) -> Self {
        self.supplier_id = supplier_id;
        self
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial_number = serial;
        self
    }
}

/// Result of one committed stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAdjustment {
    pub record: InventoryRecord,
    pub change: StockChange,
    pub entry: LedgerEntry,
}

#[derive(Debug, Clone)]
pub struct AdjustStock {
    pub product_id: ProductId,
    /// Positive = receipt, negative = consumption. Never zero.
    pub delta: i64,
    pub reorder_point: Option<i64>,
    pub meta: StockMeta,
}

/// One line of a receipt or supplier return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkReceive {
    pub supplier_id: SupplierId,
    pub received_by: UserId,
    pub items: Vec<StockLine>,
    pub received_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SupplierReturn {
    pub supplier_id: SupplierId,
    pub returned_by: UserId,
    pub reason: String,
    pub items: Vec<StockLine>,
    pub returned_at: DateTime<Utc>,
}

/// Line that passed request validation; serial already normalized.
#[derive(Debug, Clone)]
struct CheckedLine {
    product: Product,
    quantity: i64,
    serial: Option<String>,
}

// -------------------------
// Unit-of-work helpers
// -------------------------

async fn load_or_new(uow: &mut dyn UnitOfWork, product_id: ProductId) -> LedgerResult<InventoryRecord> {
    Ok(uow
        .inventory(product_id)
        .await?
        .unwrap_or_else(|| InventoryRecord::new(product_id)))
}

async fn persist(
    uow: &mut dyn UnitOfWork,
    record: InventoryRecord,
    change: StockChange,
    transaction_type: TransactionType,
    quantity: i64,
    meta: &StockMeta,
) -> LedgerResult<StockAdjustment> {
    let entry = LedgerEntry::new(&record, transaction_type, quantity, meta.actor, meta.at)?
        .with_serial(meta.serial_number.clone())
        .with_notes(meta.notes.clone());
    uow.put_inventory(&record).await?;
    uow.append_transaction(&entry).await?;
    Ok(StockAdjustment { record, change, entry })
}

/// Clamping adjustment: `stock = max(0, stock + delta)`.
///
/// The ledger entry records the requested magnitude `|delta|`, which exceeds
/// the applied change when the floor absorbed part of a decrement.
pub(crate) async fn adjust_in_unit(
    uow: &mut dyn UnitOfWork,
    product_id: ProductId,
    delta: i64,
    reorder_point: Option<i64>,
    meta: &StockMeta,
) -> LedgerResult<StockAdjustment> {
    let magnitude = delta.checked_abs().ok_or(DomainError::InvalidQuantity(delta))?;
    let mut record = load_or_new(uow, product_id).await?;

    let change = if delta > 0 && meta.supplier_id.is_some() {
        record.receive(delta, meta.supplier_id, meta.at)?
    } else {
        record.apply_delta(delta)?
    };
    if let Some(reorder_point) = reorder_point {
        record.set_reorder_point(reorder_point)?;
    }
    if change.was_clamped() {
        warn!(
            product_id = %product_id,
            requested = change.requested,
            applied = change.applied(),
            "decrement clamped at zero"
        );
    }

    persist(uow, record, change, TransactionType::for_delta(delta), magnitude, meta).await
}

/// Increment-only receipt; stamps supplier and restock date.
pub(crate) async fn receive_in_unit(
    uow: &mut dyn UnitOfWork,
    product_id: ProductId,
    quantity: i64,
    meta: &StockMeta,
) -> LedgerResult<StockAdjustment> {
    let mut record = load_or_new(uow, product_id).await?;
    let change = record.receive(quantity, meta.supplier_id, meta.at)?;
    persist(uow, record, change, TransactionType::In, quantity, meta).await
}

/// Exact removal that never clamps: `InsufficientStock` when short.
pub(crate) async fn remove_exact_in_unit(
    uow: &mut dyn UnitOfWork,
    product_id: ProductId,
    quantity: i64,
    transaction_type: TransactionType,
    meta: &StockMeta,
) -> LedgerResult<StockAdjustment> {
    let mut record = load_or_new(uow, product_id).await?;
    let change = record.remove_exact(quantity)?;
    persist(uow, record, change, transaction_type, quantity, meta).await
}

/// The ledger coordinator for manual adjustments, receipts and supplier returns.
#[derive(Debug, Clone)]
pub struct StockLedger<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> StockLedger<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> StockLedger<S, C>
where
    S: LedgerStore,
    C: ProductCatalog,
{
    /// Apply a signed adjustment, clamping at zero.
    ///
    /// Callers that must not oversell check availability first (see
    /// `SalesCoordinator::create_sale`). Zero deltas are rejected.
    #[instrument(skip(self, req), fields(product_id = %req.product_id, delta = req.delta), err)]
    pub async fn adjust_stock(&self, req: AdjustStock) -> LedgerResult<StockAdjustment> {
        if req.delta == 0 {
            return Err(DomainError::InvalidQuantity(0).into());
        }
        if let Some(rp) = req.reorder_point {
            if rp < 0 {
                return Err(DomainError::InvalidQuantity(rp).into());
            }
        }
        require_product(&self.catalog, req.product_id).await?;

        let mut uow = self.store.begin(LockSet::new().product(req.product_id)).await?;
        let adjustment =
            adjust_in_unit(uow.as_mut(), req.product_id, req.delta, req.reorder_point, &req.meta).await?;
        uow.commit().await?;

        info!(
            stock = adjustment.record.stock,
            clamped = adjustment.change.was_clamped(),
            "stock adjusted"
        );
        Ok(adjustment)
    }

    /// Receive a batch from a supplier, all-or-nothing.
    ///
    /// Lines naming a serial must have quantity 1 and reference a registered,
    /// `available` serial of the same product. Serial-tracked products must
    /// name a serial on every line.
    #[instrument(
        skip(self, req),
        fields(supplier_id = %req.supplier_id, item_count = req.items.len()),
        err
    )]
    pub async fn bulk_receive(&self, req: BulkReceive) -> LedgerResult<Vec<StockAdjustment>> {
        let lines = check_lines(&self.catalog, &req.items).await?;

        let mut uow = self.store.begin(lock_set_for(&lines)).await?;
        let receipts = receive_lines(
            uow.as_mut(),
            &lines,
            req.supplier_id,
            req.received_by,
            req.received_at,
            req.notes.as_deref(),
        )
        .await?;
        uow.commit().await?;

        info!(units = lines.iter().map(|l| l.quantity).sum::<i64>(), "batch received");
        Ok(receipts)
    }

    /// Send specific units back to a supplier. Never clamps.
    ///
    /// Serials move `available|returned → defective`; a serial in any other
    /// state fails the whole call with `SerialNotAvailable`.
    #[instrument(
        skip(self, req),
        fields(supplier_id = %req.supplier_id, item_count = req.items.len()),
        err
    )]
    pub async fn return_to_supplier(&self, req: SupplierReturn) -> LedgerResult<Vec<StockAdjustment>> {
        if req.reason.trim().is_empty() {
            return Err(DomainError::validation("a supplier return needs a reason").into());
        }
        let lines = check_lines(&self.catalog, &req.items).await?;

        let mut uow = self.store.begin(lock_set_for(&lines)).await?;

        // Serial state first: a sold unit is reported as such even when the
        // stock count would also be short.
        for line in &lines {
            if let Some(serial) = &line.serial {
                let mut unit = uow
                    .serial(serial)
                    .await?
                    .ok_or_else(|| DomainError::serial_mismatch(format!("serial {serial} is not registered")))?;
                unit.ensure_belongs_to(line.product.id)?;
                unit.transition(SerialTransition::ReturnToSupplier, req.returned_at)?;
                uow.put_serial(&unit).await?;
            }
        }

        let mut removals = Vec::with_capacity(lines.len());
        for line in &lines {
            let meta = StockMeta::new(req.returned_by, req.returned_at)
                .with_supplier(Some(req.supplier_id))
                .with_serial(line.serial.clone())
                .with_notes(req.reason.clone());
            removals.push(
                remove_exact_in_unit(
                    uow.as_mut(),
                    line.product.id,
                    line.quantity,
                    TransactionType::ReturnToSupplier,
                    &meta,
                )
                .await?,
            );
        }
        uow.commit().await?;

        info!(units = lines.iter().map(|l| l.quantity).sum::<i64>(), "returned to supplier");
        Ok(removals)
    }

    /// Metadata-only update; creates the record lazily, appends no ledger entry.
    #[instrument(skip(self), err)]
    pub async fn set_reorder_point(&self, product_id: ProductId, reorder_point: i64) -> LedgerResult<InventoryRecord> {
        if reorder_point < 0 {
            return Err(DomainError::InvalidQuantity(reorder_point).into());
        }
        require_product(&self.catalog, product_id).await?;

        let mut uow = self.store.begin(LockSet::new().product(product_id)).await?;
        let mut record = load_or_new(uow.as_mut(), product_id).await?;
        record.set_reorder_point(reorder_point)?;
        uow.put_inventory(&record).await?;
        uow.commit().await?;
        Ok(record)
    }
}

/// Validate a receipt/return request without touching storage rows.
async fn check_lines<C: ProductCatalog>(catalog: &C, items: &[StockLine]) -> LedgerResult<Vec<CheckedLine>> {
    if items.is_empty() {
        return Err(DomainError::validation("at least one item is required").into());
    }

    let mut seen_serials = HashSet::new();
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            return Err(DomainError::InvalidQuantity(item.quantity).into());
        }
        let product = require_product(catalog, item.product_id).await?;

        let serial = match &item.serial_number {
            Some(raw) => {
                let serial = normalize_serial(raw)?;
                if !product.requires_serial {
                    return Err(DomainError::serial_mismatch(format!(
                        "product {} is not serial-tracked",
                        product.id
                    ))
                    .into());
                }
                if item.quantity != 1 {
                    return Err(DomainError::serial_mismatch(format!(
                        "serial {serial} names one unit but the line has quantity {}",
                        item.quantity
                    ))
                    .into());
                }
                if !seen_serials.insert(serial.clone()) {
                    return Err(DomainError::serial_mismatch(format!("serial {serial} listed more than once")).into());
                }
                Some(serial)
            }
            None if product.requires_serial => {
                return Err(DomainError::serial_mismatch(format!(
                    "product {} is serial-tracked; every unit needs a serial",
                    product.id
                ))
                .into());
            }
            None => None,
        };

        lines.push(CheckedLine {
            product,
            quantity: item.quantity,
            serial,
        });
    }
    Ok(lines)
}

fn lock_set_for(lines: &[CheckedLine]) -> LockSet {
    let mut locks = LockSet::new();
    for line in lines {
        locks.insert(LockKey::Product(line.product.id));
        if let Some(serial) = &line.serial {
            locks.insert(LockKey::Serial(serial.clone()));
        }
    }
    locks
}

/// Receipt body shared by `bulk_receive` and serialized receipts.
async fn receive_lines(
    uow: &mut dyn UnitOfWork,
    lines: &[CheckedLine],
    supplier_id: SupplierId,
    received_by: UserId,
    received_at: DateTime<Utc>,
    notes: Option<&str>,
) -> LedgerResult<Vec<StockAdjustment>> {
    let mut receipts = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(serial) = &line.serial {
            let unit = uow
                .serial(serial)
                .await?
                .ok_or_else(|| DomainError::serial_mismatch(format!("serial {serial} is not registered")))?;
            unit.ensure_belongs_to(line.product.id)?;
            if unit.status != SerialStatus::Available {
                return Err(DomainError::SerialNotAvailable {
                    serial: unit.serial.clone(),
                    status: unit.status.to_string(),
                }
                .into());
            }
        }

        let mut meta = StockMeta::new(received_by, received_at)
            .with_supplier(Some(supplier_id))
            .with_serial(line.serial.clone());
        meta.notes = notes.map(str::to_string);
        receipts.push(receive_in_unit(uow, line.product.id, line.quantity, &meta).await?);
    }
    Ok(receipts)
}

/// Validate and receive serialized lines inside an already-open unit.
pub(crate) async fn receive_checked_serials(
    uow: &mut dyn UnitOfWork,
    product: &Product,
    serials: &[String],
    supplier_id: SupplierId,
    received_by: UserId,
    received_at: DateTime<Utc>,
) -> LedgerResult<Vec<StockAdjustment>> {
    let lines: Vec<CheckedLine> = serials
        .iter()
        .map(|s| CheckedLine {
            product: product.clone(),
            quantity: 1,
            serial: Some(s.clone()),
        })
        .collect();
    receive_lines(uow, &lines, supplier_id, received_by, received_at, None).await
}
