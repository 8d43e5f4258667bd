use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partsledger_core::{DomainError, DomainResult, InventoryId, ProductId, TransactionId, UserId};

use crate::record::InventoryRecord;

/// Direction of a stock movement in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    In,
    Out,
    ReturnToSupplier,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::In => "in",
            TransactionType::Out => "out",
            TransactionType::ReturnToSupplier => "return_to_supplier",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(TransactionType::In),
            "out" => Some(TransactionType::Out),
            "return_to_supplier" => Some(TransactionType::ReturnToSupplier),
            _ => None,
        }
    }

    /// Type implied by a signed adjustment.
    pub fn for_delta(delta: i64) -> Self {
        if delta > 0 {
            TransactionType::In
        } else {
            TransactionType::Out
        }
    }

    pub fn sign(&self) -> i64 {
        match self {
            TransactionType::In => 1,
            TransactionType::Out | TransactionType::ReturnToSupplier => -1,
        }
    }
}

/// Immutable audit-trail entry. Exactly one per stock-count change.
///
/// `quantity` is the magnitude the caller requested. For clamped decrements
/// this can exceed the units actually removed; see [`replay_with_clamping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: TransactionId,
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub serial_number: Option<String>,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub created_by: UserId,
}

impl LedgerEntry {
    pub fn new(
        record: &InventoryRecord,
        transaction_type: TransactionType,
        quantity: i64,
        created_by: UserId,
        transaction_date: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        Ok(Self {
            transaction_id: TransactionId::new(),
            inventory_id: record.id,
            product_id: record.product_id,
            transaction_type,
            quantity,
            serial_number: None,
            notes: None,
            transaction_date,
            created_by,
        })
    }

    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial_number = serial;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn signed_quantity(&self) -> i64 {
        self.transaction_type.sign() * self.quantity
    }
}

/// Rebuild a product's stock from its audit trail.
///
/// Entries are replayed in order with the same floor-at-zero rule the ledger
/// applies, so the result matches the persisted stock even when the trail
/// carries requested (not applied) magnitudes for clamped decrements.
pub fn replay_with_clamping<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries
        .into_iter()
        .fold(0i64, |stock, entry| (stock + entry.signed_quantity()).max(0))
}
