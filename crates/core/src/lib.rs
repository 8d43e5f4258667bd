//! Shared domain building blocks for the ledger crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the closed error taxonomy, and the `Entity` marker.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    InventoryId, ProductId, ReturnId, SaleId, SaleItemId, SupplierId, TransactionId, UserId,
};
