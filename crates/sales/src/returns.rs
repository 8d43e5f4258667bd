use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, Entity, ProductId, ReturnId, SaleId, SaleItemId, UserId};
use partsledger_inventory::normalize_serial;

use crate::sale::{Sale, SaleStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    Cash,
    Card,
    BankTransfer,
    StoreCredit,
}

/// Requested return of part of one sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub sale_item_id: SaleItemId,
    pub quantity: i64,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

/// Validated, priced return of part of one sale line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub sale_item_id: SaleItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub serial_numbers: Vec<String>,
    pub unit_price: u64,
}

impl ReturnItem {
    pub fn refund_amount(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity as u64)
    }
}

/// Persisted customer return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub id: ReturnId,
    pub sale_id: SaleId,
    pub reason: String,
    pub refund_method: RefundMethod,
    pub restocked: bool,
    /// Reference into external proof storage (e.g. an uploaded photo).
    pub proof_path: Option<String>,
    pub items: Vec<ReturnItem>,
    pub refund_amount: u64,
    pub processed_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for ReturnRecord {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Sale {
    /// Validate a return request against this sale without changing it.
    ///
    /// Checks line membership, remaining returnable quantity and, for
    /// serial-tracked lines, that exactly the returned serials are named and
    /// each is still outstanding on the line. Whether the registry still holds
    /// the unit as `sold` is checked by the caller.
    pub fn plan_return(&self, lines: &[ReturnLine]) -> DomainResult<Vec<ReturnItem>> {
        if self.status == SaleStatus::Cancelled {
            return Err(DomainError::transition(format!(
                "sale {} is cancelled and cannot be returned",
                self.sale_number
            )));
        }
        if lines.is_empty() {
            return Err(DomainError::validation("a return needs at least one item"));
        }

        let mut seen_items = HashSet::new();
        let mut seen_serials = HashSet::new();
        let mut planned = Vec::with_capacity(lines.len());

        for line in lines {
            if !seen_items.insert(line.sale_item_id) {
                return Err(DomainError::validation(format!(
                    "sale item {} listed more than once",
                    line.sale_item_id
                )));
            }
            let item = self
                .item(line.sale_item_id)
                .ok_or(DomainError::SaleItemNotFound(line.sale_item_id))?;

            if line.quantity <= 0 {
                return Err(DomainError::InvalidQuantity(line.quantity));
            }
            let remaining = item.remaining_returnable();
            if line.quantity > remaining {
                return Err(DomainError::OverReturn {
                    sale_item_id: item.id,
                    requested: line.quantity,
                    remaining,
                });
            }

            let mut serials = Vec::with_capacity(line.serial_numbers.len());
            if item.serial_tracked {
                if line.serial_numbers.len() as i64 != line.quantity {
                    return Err(DomainError::serial_mismatch(format!(
                        "sale item {} returns {} units but names {} serials",
                        item.id,
                        line.quantity,
                        line.serial_numbers.len()
                    )));
                }
                for raw in &line.serial_numbers {
                    let serial = normalize_serial(raw)?;
                    if !seen_serials.insert(serial.clone()) {
                        return Err(DomainError::serial_mismatch(format!(
                            "serial {serial} listed more than once"
                        )));
                    }
                    if !item.outstanding_serials().any(|s| *s == serial) {
                        return Err(DomainError::serial_mismatch(format!(
                            "serial {serial} was not sold on sale item {}",
                            item.id
                        )));
                    }
                    serials.push(serial);
                }
            } else if !line.serial_numbers.is_empty() {
                return Err(DomainError::serial_mismatch(format!(
                    "sale item {} is not serial-tracked",
                    item.id
                )));
            }

            planned.push(ReturnItem {
                sale_item_id: item.id,
                product_id: item.product_id,
                quantity: line.quantity,
                serial_numbers: serials,
                unit_price: item.unit_price,
            });
        }

        Ok(planned)
    }

    /// Record planned return items on the sale and recompute its status.
    pub fn apply_return(&mut self, items: &[ReturnItem], at: DateTime<Utc>) -> DomainResult<()> {
        for returned in items {
            let item = self
                .item_mut(returned.sale_item_id)
                .ok_or(DomainError::SaleItemNotFound(returned.sale_item_id))?;
            item.returned_quantity += returned.quantity;
            item.returned_serials
                .extend(returned.serial_numbers.iter().cloned());
        }
        self.recompute_after_return(at);
        Ok(())
    }
}
