//! Registration and lookup of individually tracked units.
//!
//! Status transitions after registration are driven by the stock ledger, the
//! sales coordinator and the return processor; this module only creates
//! serials and edits their free-text notes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use partsledger_core::{DomainError, ProductId, SupplierId, UserId};
use partsledger_inventory::{SerialNumber, SerialStatus, normalize_serial};
use partsledger_products::Product;

use crate::catalog::ProductCatalog;
use crate::catalog_guard::require_product;
use crate::error::LedgerResult;
use crate::stock_ledger::{StockAdjustment, receive_checked_serials};
use crate::store::{LedgerStore, LockKey, LockSet, UnitOfWork};

#[derive(Debug, Clone)]
pub struct RegisterSerials {
    pub product_id: ProductId,
    pub serials: Vec<String>,
    pub supplier_id: Option<SupplierId>,
    pub notes: Option<String>,
    pub actor: UserId,
}

#[derive(Debug, Clone)]
pub struct ReceiveSerialized {
    pub supplier_id: SupplierId,
    pub received_by: UserId,
    pub product_id: ProductId,
    pub serials: Vec<String>,
    pub received_at: DateTime<Utc>,
}

/// Serials registered and the stock movements that received them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SerializedReceipt {
    pub serials: Vec<SerialNumber>,
    pub receipts: Vec<StockAdjustment>,
}

#[derive(Debug, Clone)]
pub struct SerialRegistry<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> SerialRegistry<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> SerialRegistry<S, C>
where
    S: LedgerStore,
    C: ProductCatalog,
{
    /// Register new `available` units for a serial-tracked product.
    #[instrument(
        skip(self, req),
        fields(product_id = %req.product_id, serial_count = req.serials.len(), actor = %req.actor),
        err
    )]
    pub async fn register(&self, req: RegisterSerials) -> LedgerResult<Vec<SerialNumber>> {
        let product = require_product(&self.catalog, req.product_id).await?;
        let serials = check_new_serials(&product, &req.serials)?;

        let mut locks = LockSet::new();
        locks.extend(serials.iter().cloned().map(LockKey::Serial));
        let mut uow = self.store.begin(locks).await?;
        let registered = register_in_unit(
            uow.as_mut(),
            &product,
            &serials,
            req.supplier_id,
            req.notes.clone(),
            Utc::now(),
        )
        .await?;
        uow.commit().await?;

        info!("serials registered");
        Ok(registered)
    }

    /// Register serials and receive them into stock in one unit of work.
    #[instrument(
        skip(self, req),
        fields(product_id = %req.product_id, supplier_id = %req.supplier_id, serial_count = req.serials.len()),
        err
    )]
    pub async fn receive_serialized(&self, req: ReceiveSerialized) -> LedgerResult<SerializedReceipt> {
        let product = require_product(&self.catalog, req.product_id).await?;
        let serials = check_new_serials(&product, &req.serials)?;

        let mut locks = LockSet::new().product(product.id);
        locks.extend(serials.iter().cloned().map(LockKey::Serial));
        let mut uow = self.store.begin(locks).await?;
        let registered = register_in_unit(
            uow.as_mut(),
            &product,
            &serials,
            Some(req.supplier_id),
            None,
            req.received_at,
        )
        .await?;
        let receipts = receive_checked_serials(
            uow.as_mut(),
            &product,
            &serials,
            req.supplier_id,
            req.received_by,
            req.received_at,
        )
        .await?;
        uow.commit().await?;

        info!("serialized units received");
        Ok(SerializedReceipt {
            serials: registered,
            receipts,
        })
    }

    pub async fn find(&self, serial: &str) -> LedgerResult<Option<SerialNumber>> {
        let serial = normalize_serial(serial)?;
        Ok(self.store.serial(&serial).await?)
    }

    pub async fn serials_for_product(
        &self,
        product_id: ProductId,
        status: Option<SerialStatus>,
    ) -> LedgerResult<Vec<SerialNumber>> {
        require_product(&self.catalog, product_id).await?;
        Ok(self.store.serials_for_product(product_id, status).await?)
    }

    /// True when any unit is `sold` or `defective`.
    pub async fn has_immutable_serials(&self, product_id: ProductId) -> LedgerResult<bool> {
        product_has_immutable_serials(&self.store, product_id).await
    }

    /// Notes are the only field callers may edit directly.
    #[instrument(skip(self, notes), err)]
    pub async fn update_notes(&self, serial: &str, notes: Option<String>) -> LedgerResult<SerialNumber> {
        let serial = normalize_serial(serial)?;
        let mut uow = self.store.begin(LockSet::new().serial(serial.clone())).await?;
        let mut unit = uow
            .serial(&serial)
            .await?
            .ok_or_else(|| DomainError::serial_mismatch(format!("serial {serial} is not registered")))?;
        unit.notes = notes;
        unit.updated_at = Utc::now();
        uow.put_serial(&unit).await?;
        uow.commit().await?;
        Ok(unit)
    }
}

/// Per-product evidence check shared with the catalog guard.
pub(crate) async fn product_has_immutable_serials<S>(store: &S, product_id: ProductId) -> LedgerResult<bool>
where
    S: LedgerStore + ?Sized,
{
    let evidence = [
        SerialStatus::Available,
        SerialStatus::Sold,
        SerialStatus::Defective,
        SerialStatus::Returned,
    ]
    .into_iter()
    .filter(SerialStatus::is_immutable_evidence);
    for status in evidence {
        if !store.serials_for_product(product_id, Some(status)).await?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Normalize a registration request and reject in-request duplicates.
fn check_new_serials(product: &Product, raw: &[String]) -> LedgerResult<Vec<String>> {
    if !product.requires_serial {
        return Err(DomainError::serial_mismatch(format!("product {} is not serial-tracked", product.id)).into());
    }
    if raw.is_empty() {
        return Err(DomainError::validation("at least one serial is required").into());
    }
    let mut seen = HashSet::new();
    let mut serials = Vec::with_capacity(raw.len());
    for s in raw {
        let serial = normalize_serial(s)?;
        if !seen.insert(serial.clone()) {
            return Err(DomainError::DuplicateSerial(serial).into());
        }
        serials.push(serial);
    }
    Ok(serials)
}

async fn register_in_unit(
    uow: &mut dyn UnitOfWork,
    product: &Product,
    serials: &[String],
    supplier_id: Option<SupplierId>,
    notes: Option<String>,
    at: DateTime<Utc>,
) -> LedgerResult<Vec<SerialNumber>> {
    let mut registered = Vec::with_capacity(serials.len());
    for serial in serials {
        if uow.serial(serial).await?.is_some() {
            return Err(DomainError::DuplicateSerial(serial.clone()).into());
        }
        let unit = SerialNumber::register(serial, product.id, supplier_id, notes.clone(), at)?;
        uow.put_serial(&unit).await?;
        registered.push(unit);
    }
    Ok(registered)
}
