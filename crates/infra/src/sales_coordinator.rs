//! Sales checkout and the order-desk lifecycle.
//!
//! `create_sale` turns a cart into a committed sale in one unit of work:
//! availability is checked for every product before the first decrement,
//! serials move to `sold`, the ledger records each decrement and the sale row
//! is written. Cancelling or deleting a sale runs the reverse in one unit.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{Span, field, info, instrument};

use partsledger_core::{DomainError, ProductId, SaleId, UserId};
use partsledger_inventory::{SerialStatus, SerialTransition, normalize_serial};
use partsledger_products::Product;
use partsledger_sales::{
    CustomerInfo, PaymentInfo, PaymentStatus, Sale, SaleItem, SaleStatus, format_sale_number,
};

use crate::catalog::ProductCatalog;
use crate::catalog_guard::require_product;
use crate::error::LedgerResult;
use crate::stock_ledger::{StockMeta, adjust_in_unit};
use crate::store::{LedgerStore, LockKey, LockSet, UnitOfWork};

/// One cart line as submitted by a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreateSale {
    pub customer: CustomerInfo,
    pub payment: PaymentInfo,
    pub items: Vec<SaleLine>,
    pub actor: UserId,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateSaleStatus {
    pub sale_id: SaleId,
    pub status: Option<SaleStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub actor: UserId,
}

/// Cart line resolved against the catalog.
struct PricedLine {
    product: Product,
    quantity: i64,
    serials: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SalesCoordinator<S, C> {
    store: S,
    catalog: C,
}

impl<S, C> SalesCoordinator<S, C> {
    pub fn new(store: S, catalog: C) -> Self {
        Self { store, catalog }
    }
}

impl<S, C> SalesCoordinator<S, C>
where
    S: LedgerStore,
    C: ProductCatalog,
{
    /// Commit a sale, or fail with zero stock and serial side effects.
    #[instrument(skip(self, req), fields(item_count = req.items.len(), actor = %req.actor, sale_id = field::Empty), err)]
    pub async fn create_sale(&self, req: CreateSale) -> LedgerResult<Sale> {
        let lines = self.price_lines(&req.items).await?;

        let sale_id = SaleId::new();
        let mut locks = LockSet::new().sale(sale_id);
        for line in &lines {
            locks.insert(LockKey::Product(line.product.id));
            locks.extend(line.serials.iter().cloned().map(LockKey::Serial));
        }
        let mut uow = self.store.begin(locks).await?;

        // No oversell: every product is checked before any decrement, since
        // the ledger itself clamps.
        let mut needed: BTreeMap<ProductId, i64> = BTreeMap::new();
        for line in &lines {
            *needed.entry(line.product.id).or_default() += line.quantity;
        }
        for (&product_id, &quantity) in &needed {
            let available = uow.inventory(product_id).await?.map_or(0, |r| r.stock);
            if available < quantity {
                return Err(DomainError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                }
                .into());
            }
        }

        let now = Utc::now();
        for line in &lines {
            for serial in &line.serials {
                let mut unit = uow.serial(serial).await?.ok_or_else(|| {
                    DomainError::serial_mismatch(format!("serial {serial} is not registered"))
                })?;
                unit.ensure_belongs_to(line.product.id)?;
                unit.transition(SerialTransition::Sell, now)?;
                uow.put_serial(&unit).await?;
            }
        }

        let sale_number = format_sale_number(now.date_naive(), uow.next_sale_sequence().await?);
        let notes = format!("sale {sale_number}");
        for line in &lines {
            let meta = StockMeta::new(req.actor, now).with_notes(notes.clone());
            if line.serials.is_empty() {
                adjust_in_unit(uow.as_mut(), line.product.id, -line.quantity, None, &meta).await?;
            } else {
                for serial in &line.serials {
                    let meta = meta.clone().with_serial(Some(serial.clone()));
                    adjust_in_unit(uow.as_mut(), line.product.id, -1, None, &meta).await?;
                }
            }
        }

        let items = lines
            .into_iter()
            .map(|line| {
                SaleItem::new(
                    line.product.id,
                    line.quantity,
                    line.product.price,
                    line.product.requires_serial,
                    line.serials,
                )
            })
            .collect();
        let sale = Sale {
            id: sale_id,
            ..Sale::new(sale_number, req.customer, req.payment, items, req.actor, now)?
        };
        uow.put_sale(&sale).await?;
        uow.commit().await?;

        Span::current().record("sale_id", field::display(sale.id));
        info!(
            sale_number = %sale.sale_number,
            total = sale.total,
            status = sale.status.as_str(),
            "sale committed"
        );
        Ok(sale)
    }

    /// Manual status change; cancellation restores outstanding stock.
    #[instrument(skip(self, req), fields(sale_id = %req.sale_id, actor = %req.actor), err)]
    pub async fn update_status(&self, req: UpdateSaleStatus) -> LedgerResult<Sale> {
        let snapshot = self.snapshot(req.sale_id).await?;
        let locks = if req.status == Some(SaleStatus::Cancelled) {
            compensation_locks(&snapshot)
        } else {
            LockSet::new().sale(req.sale_id)
        };

        let mut uow = self.store.begin(locks).await?;
        let mut sale = load_sale(uow.as_mut(), req.sale_id).await?;
        let now = Utc::now();
        let update = sale.update_status(req.status, req.payment_status, now)?;
        if update.is_cancellation() {
            let notes = format!("sale {} cancelled", sale.sale_number);
            restore_in_unit(uow.as_mut(), &sale, req.actor, &notes).await?;
        }
        uow.put_sale(&sale).await?;
        uow.commit().await?;

        info!(
            previous = update.previous.as_str(),
            status = update.status.as_str(),
            payment_status = update.payment_status.as_str(),
            "sale status updated"
        );
        Ok(sale)
    }

    /// Remove a sale and hand its outstanding units back to inventory.
    ///
    /// Refused once any return has been recorded against the sale. A
    /// cancelled sale was already restored and is removed as-is.
    #[instrument(skip(self), err)]
    pub async fn delete_sale(&self, sale_id: SaleId, actor: UserId) -> LedgerResult<Sale> {
        let snapshot = self.snapshot(sale_id).await?;

        let mut uow = self.store.begin(compensation_locks(&snapshot)).await?;
        let sale = load_sale(uow.as_mut(), sale_id).await?;
        if sale.has_returns() {
            return Err(DomainError::transition(format!(
                "sale {} has recorded returns and cannot be deleted",
                sale.sale_number
            ))
            .into());
        }
        if sale.status != SaleStatus::Cancelled {
            let notes = format!("sale {} deleted", sale.sale_number);
            restore_in_unit(uow.as_mut(), &sale, actor, &notes).await?;
        }
        uow.delete_sale(sale_id).await?;
        uow.commit().await?;

        info!(sale_number = %sale.sale_number, "sale deleted");
        Ok(sale)
    }

    pub async fn get_sale(&self, sale_id: SaleId) -> LedgerResult<Sale> {
        self.snapshot(sale_id).await
    }

    async fn snapshot(&self, sale_id: SaleId) -> LedgerResult<Sale> {
        self.store
            .sale(sale_id)
            .await?
            .ok_or_else(|| DomainError::SaleNotFound(sale_id).into())
    }

    /// Validate the cart against the catalog; no storage access.
    async fn price_lines(&self, items: &[SaleLine]) -> LedgerResult<Vec<PricedLine>> {
        if items.is_empty() {
            return Err(DomainError::validation("a sale needs at least one item").into());
        }

        let mut seen_serials = HashSet::new();
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity <= 0 {
                return Err(DomainError::InvalidQuantity(item.quantity).into());
            }
            let product = require_product(&self.catalog, item.product_id).await?;
            if !product.is_active() {
                return Err(DomainError::validation(format!("product {} is not for sale", product.id)).into());
            }

            let mut serials = Vec::with_capacity(item.serial_numbers.len());
            if product.requires_serial {
                if item.serial_numbers.len() as i64 != item.quantity {
                    return Err(DomainError::serial_mismatch(format!(
                        "product {} needs {} serials, got {}",
                        product.id,
                        item.quantity,
                        item.serial_numbers.len()
                    ))
                    .into());
                }
                for raw in &item.serial_numbers {
                    let serial = normalize_serial(raw)?;
                    if !seen_serials.insert(serial.clone()) {
                        return Err(
                            DomainError::serial_mismatch(format!("serial {serial} listed more than once")).into(),
                        );
                    }
                    serials.push(serial);
                }
            } else if !item.serial_numbers.is_empty() {
                return Err(
                    DomainError::serial_mismatch(format!("product {} is not serial-tracked", product.id)).into(),
                );
            }

            lines.push(PricedLine {
                product,
                quantity: item.quantity,
                serials,
            });
        }
        Ok(lines)
    }
}

pub(crate) async fn load_sale(uow: &mut dyn UnitOfWork, sale_id: SaleId) -> LedgerResult<Sale> {
    uow.sale(sale_id)
        .await?
        .ok_or_else(|| DomainError::SaleNotFound(sale_id).into())
}

/// Keys touched when reversing a sale.
///
/// Planned from an unlocked snapshot: item products never change, and the
/// outstanding serials of a line only shrink, so the set stays sufficient
/// once the sale is re-read under its lock.
pub(crate) fn compensation_locks(sale: &Sale) -> LockSet {
    let mut locks = LockSet::new().sale(sale.id);
    for item in &sale.items {
        locks.insert(LockKey::Product(item.product_id));
        locks.extend(item.outstanding_serials().cloned().map(LockKey::Serial));
    }
    locks
}

/// Restock every unit not already returned and revert still-sold serials.
async fn restore_in_unit(uow: &mut dyn UnitOfWork, sale: &Sale, actor: UserId, notes: &str) -> LedgerResult<()> {
    let now = Utc::now();
    for item in &sale.items {
        let outstanding = item.remaining_returnable();
        if outstanding <= 0 {
            continue;
        }
        let meta = StockMeta::new(actor, now).with_notes(notes);

        if !item.serial_tracked {
            adjust_in_unit(uow, item.product_id, outstanding, None, &meta).await?;
            continue;
        }
        for serial in item.outstanding_serials() {
            if let Some(mut unit) = uow.serial(serial).await? {
                if unit.status == SerialStatus::Sold {
                    unit.transition(SerialTransition::ReverseSale, now)?;
                    uow.put_serial(&unit).await?;
                }
            }
            let meta = meta.clone().with_serial(Some(serial.clone()));
            adjust_in_unit(uow, item.product_id, 1, None, &meta).await?;
        }
    }
    Ok(())
}
