use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};

use partsledger_core::SaleId;
use partsledger_infra::{CreateSale, ProcessReturn, UpdateSaleStatus};

use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_sale))
        .route("/:id", get(get_sale).delete(delete_sale))
        .route("/:id/status", patch(update_status))
        .route("/:id/returns", post(process_return).get(list_returns))
}

pub async fn create_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateSaleRequest>,
) -> axum::response::Response {
    let req = CreateSale {
        customer: body.customer,
        payment: body.payment,
        items: body.items,
        actor: actor.actor_id(),
    };

    match services.sales.create_sale(req).await {
        Ok(sale) => (StatusCode::CREATED, Json(sale)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let sale_id: SaleId = match parse_id(&id, "sale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.sales.get_sale(sale_id).await {
        Ok(sale) => Json(sale).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateStatusRequest>,
) -> axum::response::Response {
    let sale_id: SaleId = match parse_id(&id, "sale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = UpdateSaleStatus {
        sale_id,
        status: body.status,
        payment_status: body.payment_status,
        actor: actor.actor_id(),
    };
    match services.sales.update_status(req).await {
        Ok(sale) => Json(sale).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn delete_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let sale_id: SaleId = match parse_id(&id, "sale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.sales.delete_sale(sale_id, actor.actor_id()).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn process_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProcessReturnRequest>,
) -> axum::response::Response {
    let sale_id: SaleId = match parse_id(&id, "sale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = ProcessReturn {
        sale_id,
        reason: body.reason,
        refund_method: body.refund_method,
        restocked: body.restocked,
        proof_path: body.proof_path,
        items: body.items,
        actor: actor.actor_id(),
    };
    match services.returns.process_return(req).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_returns(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let sale_id: SaleId = match parse_id(&id, "sale") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.returns.returns_for_sale(sale_id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
