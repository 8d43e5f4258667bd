//! Sales and customer-return domain module.
//!
//! This crate contains the business rules for sales and returns, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). Stock and
//! serial effects are applied by the coordinators in the infra crate.

pub mod returns;
pub mod sale;

pub use returns::{RefundMethod, ReturnItem, ReturnLine, ReturnRecord};
pub use sale::{
    CustomerInfo, FulfillmentMethod, PaymentInfo, PaymentMethod, PaymentStatus, Sale, SaleItem,
    SaleStatus, StatusUpdate, format_sale_number, initial_status,
};
