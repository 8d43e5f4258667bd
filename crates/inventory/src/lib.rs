//! Inventory domain module.
//!
//! This crate contains the business rules of the stock ledger, implemented
//! purely as deterministic domain logic (no IO, no locking, no storage):
//!
//! - [`record`]: per-product stock count with clamp-on-decrement semantics
//! - [`serial`]: lifecycle state machine of individually tracked units
//! - [`transaction`]: immutable audit-trail entries and reconciliation

pub mod record;
pub mod serial;
pub mod transaction;

pub use record::{DEFAULT_REORDER_POINT, InventoryRecord, StockChange};
pub use serial::{SerialCounts, SerialNumber, SerialStatus, SerialTransition, normalize_serial};
pub use transaction::{LedgerEntry, TransactionType, replay_with_clamping};
