use serde::Deserialize;

use partsledger_core::{ProductId, SupplierId};
use partsledger_infra::{SaleLine, StockLine};
use partsledger_inventory::SerialStatus;
use partsledger_sales::{CustomerInfo, PaymentInfo, PaymentStatus, RefundMethod, ReturnLine, SaleStatus};

// -------------------------
// Inventory
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
    pub reorder_point: Option<i64>,
    pub notes: Option<String>,
    pub supplier_id: Option<SupplierId>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderPointRequest {
    pub reorder_point: i64,
}

#[derive(Debug, Deserialize)]
pub struct BulkReceiveRequest {
    pub supplier_id: SupplierId,
    pub items: Vec<StockLine>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SupplierReturnRequest {
    pub supplier_id: SupplierId,
    pub reason: String,
    pub items: Vec<StockLine>,
}

// -------------------------
// Serials
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterSerialsRequest {
    pub product_id: ProductId,
    pub serials: Vec<String>,
    pub supplier_id: Option<SupplierId>,
    pub notes: Option<String>,
    /// Also book the units into stock (requires `supplier_id`).
    #[serde(default)]
    pub receive: bool,
}

#[derive(Debug, Deserialize)]
pub struct SerialNotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SerialFilter {
    pub status: Option<SerialStatus>,
}

// -------------------------
// Sales
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSaleRequest {
    pub customer: CustomerInfo,
    pub payment: PaymentInfo,
    pub items: Vec<SaleLine>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<SaleStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessReturnRequest {
    pub reason: String,
    pub refund_method: RefundMethod,
    pub restocked: bool,
    pub proof_path: Option<String>,
    pub items: Vec<ReturnLine>,
}
