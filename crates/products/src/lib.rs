//! Product catalog contract (read-only to the ledger).
//!
//! The catalog itself (names, brands, descriptions, forms) is owned by an
//! external collaborator. This crate only models the fields the stock ledger
//! reads, plus the catalog-side rules the ledger has evidence for.

pub mod product;

pub use product::{Product, ProductStatus};
