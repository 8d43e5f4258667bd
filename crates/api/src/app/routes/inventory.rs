use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;

use partsledger_core::ProductId;
use partsledger_infra::{AdjustStock, BulkReceive, StockMeta, SupplierReturn};

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/products", get(products_with_inventory))
        .route("/low-stock", get(low_stock))
        .route("/receipts", post(bulk_receive))
        .route("/supplier-returns", post(return_to_supplier))
        .route("/:product_id/adjust", post(adjust_stock))
        .route("/:product_id/reorder-point", put(set_reorder_point))
        .route("/:product_id/transactions", get(transaction_history))
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(product_id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut meta = StockMeta::new(actor.actor_id(), Utc::now()).with_supplier(body.supplier_id);
    if let Some(notes) = body.notes {
        meta = meta.with_notes(notes);
    }

    match services
        .stock
        .adjust_stock(AdjustStock {
            product_id,
            delta: body.delta,
            reorder_point: body.reorder_point,
            meta,
        })
        .await
    {
        Ok(adjustment) => (StatusCode::OK, Json(adjustment)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn set_reorder_point(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
    Json(body): Json<dto::ReorderPointRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stock.set_reorder_point(product_id, body.reorder_point).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn bulk_receive(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::BulkReceiveRequest>,
) -> axum::response::Response {
    let req = BulkReceive {
        supplier_id: body.supplier_id,
        received_by: actor.actor_id(),
        items: body.items,
        received_at: Utc::now(),
        notes: body.notes,
    };

    match services.stock.bulk_receive(req).await {
        Ok(receipts) => (StatusCode::CREATED, Json(receipts)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn return_to_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::SupplierReturnRequest>,
) -> axum::response::Response {
    let req = SupplierReturn {
        supplier_id: body.supplier_id,
        returned_by: actor.actor_id(),
        reason: body.reason,
        items: body.items,
        returned_at: Utc::now(),
    };

    match services.stock.return_to_supplier(req).await {
        Ok(removals) => (StatusCode::CREATED, Json(removals)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queries.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn products_with_inventory(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queries.products_with_inventory().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn low_stock(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queries.low_stock().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn transaction_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.queries.transaction_history(product_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
