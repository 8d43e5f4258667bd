//! Domain error model.

use thiserror::Error;

use crate::id::{ProductId, SaleId, SaleItemId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Closed set of business failures. Every ledger operation is all-or-nothing, so
/// receiving one of these means nothing was persisted and the request can be
/// re-issued as-is. Infrastructure failures live in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The referenced product does not exist in the catalog.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// A non-clamping decrement asked for more units than are on hand.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// Wrong count, duplicate, or unknown serial supplied for a serial-tracked line.
    #[error("serial mismatch: {0}")]
    SerialMismatch(String),

    /// The serial exists but is not in the source state the transition needs.
    #[error("serial {serial} is not available (status: {status})")]
    SerialNotAvailable { serial: String, status: String },

    /// The serial is already registered (for any product).
    #[error("duplicate serial: {0}")]
    DuplicateSerial(String),

    /// Non-positive or malformed quantity.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Return quantity exceeds what is still returnable on the sale line.
    #[error("over-return on sale item {sale_item_id}: requested {requested}, remaining {remaining}")]
    OverReturn {
        sale_item_id: SaleItemId,
        requested: i64,
        remaining: i64,
    },

    /// A catalog-level action is blocked by existing references to the product.
    #[error("product in use: {product_id} ({reason})")]
    ProductInUse { product_id: ProductId, reason: String },

    /// The referenced sale does not exist.
    #[error("sale not found: {0}")]
    SaleNotFound(SaleId),

    /// The referenced sale line does not belong to the sale.
    #[error("sale item {0} not found on sale")]
    SaleItemNotFound(SaleItemId),

    /// The requested status change is not allowed from the current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn serial_mismatch(msg: impl Into<String>) -> Self {
        Self::SerialMismatch(msg.into())
    }

    pub fn transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn product_in_use(product_id: ProductId, reason: impl Into<String>) -> Self {
        Self::ProductInUse {
            product_id,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for the calling layer.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::ProductNotFound(_) => "product_not_found",
            DomainError::InsufficientStock { .. } => "insufficient_stock",
            DomainError::SerialMismatch(_) => "serial_mismatch",
            DomainError::SerialNotAvailable { .. } => "serial_not_available",
            DomainError::DuplicateSerial(_) => "duplicate_serial",
            DomainError::InvalidQuantity(_) => "invalid_quantity",
            DomainError::OverReturn { .. } => "over_return",
            DomainError::ProductInUse { .. } => "product_in_use",
            DomainError::SaleNotFound(_) => "sale_not_found",
            DomainError::SaleItemNotFound(_) => "sale_item_not_found",
            DomainError::InvalidStateTransition(_) => "invalid_state_transition",
            DomainError::Validation(_) => "validation_error",
        }
    }
}
