use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use partsledger_core::ProductId;

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:product_id/serials", get(serials_for_product))
        .route("/:product_id/serialization-check", get(serialization_check))
        .route("/:product_id/deletion-check", get(deletion_check))
}

pub async fn serials_for_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
    Query(filter): Query<dto::SerialFilter>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.serials.serials_for_product(product_id, filter.status).await {
        Ok(serials) => Json(serials).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// 204 when the catalog may turn off serial tracking for this product.
pub async fn serialization_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.catalog_guard.ensure_serialization_can_be_disabled(product_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// 204 when no sale line references the product.
pub async fn deletion_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.catalog_guard.ensure_product_deletable(product_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
