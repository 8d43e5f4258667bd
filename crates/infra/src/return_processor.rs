//! Customer returns against committed sales.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use partsledger_core::{DomainError, ReturnId, SaleId, UserId};
use partsledger_inventory::SerialTransition;
use partsledger_sales::{RefundMethod, ReturnItem, ReturnLine, ReturnRecord};

use crate::error::LedgerResult;
use crate::sales_coordinator::load_sale;
use crate::stock_ledger::{StockMeta, adjust_in_unit};
use crate::store::{LedgerStore, LockKey, LockSet, UnitOfWork};

#[derive(Debug, Clone)]
pub struct ProcessReturn {
    pub sale_id: SaleId,
    pub reason: String,
    pub refund_method: RefundMethod,
    /// Units go back on the shelf; otherwise they are written off as defective.
    pub restocked: bool,
    pub proof_path: Option<String>,
    pub items: Vec<ReturnLine>,
    pub actor: UserId,
}

/// Returns are priced from the sale lines, so no catalog is needed here.
#[derive(Debug, Clone)]
pub struct ReturnProcessor<S> {
    store: S,
}

impl<S> ReturnProcessor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: LedgerStore> ReturnProcessor<S> {
    /// Record a return, all-or-nothing.
    #[instrument(
        skip(self, req),
        fields(sale_id = %req.sale_id, restocked = req.restocked, line_count = req.items.len()),
        err
    )]
    pub async fn process_return(&self, req: ProcessReturn) -> LedgerResult<ReturnRecord> {
        if req.reason.trim().is_empty() {
            return Err(DomainError::validation("a return needs a reason").into());
        }

        let snapshot = self
            .store
            .sale(req.sale_id)
            .await?
            .ok_or(DomainError::SaleNotFound(req.sale_id))?;
        let planned = snapshot.plan_return(&req.items)?;

        let mut locks = LockSet::new().sale(req.sale_id);
        for item in &planned {
            locks.insert(LockKey::Product(item.product_id));
            locks.extend(item.serial_numbers.iter().cloned().map(LockKey::Serial));
        }
        let mut uow = self.store.begin(locks).await?;

        // Re-plan under the sale lock; a concurrent return may have consumed
        // part of what the snapshot still showed as returnable.
        let mut sale = load_sale(uow.as_mut(), req.sale_id).await?;
        let planned = sale.plan_return(&req.items)?;
        let now = Utc::now();

        let transition = if req.restocked {
            SerialTransition::CustomerReturnRestocked
        } else {
            SerialTransition::CustomerReturnDefective
        };
        for item in &planned {
            transition_returned_serials(uow.as_mut(), item, transition, now).await?;
        }

        if req.restocked {
            let notes = format!("return on sale {}: {}", sale.sale_number, req.reason);
            for item in &planned {
                let meta = StockMeta::new(req.actor, now).with_notes(notes.clone());
                if item.serial_numbers.is_empty() {
                    adjust_in_unit(uow.as_mut(), item.product_id, item.quantity, None, &meta).await?;
                } else {
                    for serial in &item.serial_numbers {
                        let meta = meta.clone().with_serial(Some(serial.clone()));
                        adjust_in_unit(uow.as_mut(), item.product_id, 1, None, &meta).await?;
                    }
                }
            }
        }

        let record = ReturnRecord {
            id: ReturnId::new(),
            sale_id: sale.id,
            reason: req.reason,
            refund_method: req.refund_method,
            restocked: req.restocked,
            proof_path: req.proof_path,
            refund_amount: planned
                .iter()
                .map(ReturnItem::refund_amount)
                .fold(0u64, u64::saturating_add),
            items: planned,
            processed_by: req.actor,
            created_at: now,
        };
        uow.put_return(&record).await?;
        sale.apply_return(&record.items, now)?;
        uow.put_sale(&sale).await?;
        uow.commit().await?;

        info!(
            return_id = %record.id,
            refund_amount = record.refund_amount,
            sale_status = sale.status.as_str(),
            "return processed"
        );
        Ok(record)
    }

    pub async fn returns_for_sale(&self, sale_id: SaleId) -> LedgerResult<Vec<ReturnRecord>> {
        if self.store.sale(sale_id).await?.is_none() {
            return Err(DomainError::SaleNotFound(sale_id).into());
        }
        Ok(self.store.returns_for_sale(sale_id).await?)
    }
}

/// Every named serial must still be `sold` in the registry.
async fn transition_returned_serials(
    uow: &mut dyn UnitOfWork,
    item: &ReturnItem,
    transition: SerialTransition,
    at: DateTime<Utc>,
) -> LedgerResult<()> {
    for serial in &item.serial_numbers {
        let mut unit = uow
            .serial(serial)
            .await?
            .ok_or_else(|| DomainError::serial_mismatch(format!("serial {serial} is not registered")))?;
        unit.ensure_belongs_to(item.product_id)?;
        // Both customer-return edges start from `sold`.
        unit.transition(transition, at)?;
        uow.put_serial(&unit).await?;
    }
    Ok(())
}
