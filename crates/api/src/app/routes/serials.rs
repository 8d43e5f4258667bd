use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;

use partsledger_infra::{ReceiveSerialized, RegisterSerials};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_serials))
        .route("/:serial", get(get_serial))
        .route("/:serial/notes", patch(update_notes))
}

/// Register new serials; with `receive: true` the units are also booked into stock.
pub async fn register_serials(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::RegisterSerialsRequest>,
) -> axum::response::Response {
    if body.receive {
        let Some(supplier_id) = body.supplier_id else {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "supplier_id is required when receiving serials",
            );
        };

        let req = ReceiveSerialized {
            supplier_id,
            received_by: actor.actor_id(),
            product_id: body.product_id,
            serials: body.serials,
            received_at: Utc::now(),
        };
        return match services.serials.receive_serialized(req).await {
            Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
            Err(e) => errors::ledger_error_to_response(e),
        };
    }

    let req = RegisterSerials {
        product_id: body.product_id,
        serials: body.serials,
        supplier_id: body.supplier_id,
        notes: body.notes,
        actor: actor.actor_id(),
    };
    match services.serials.register(req).await {
        Ok(serials) => (StatusCode::CREATED, Json(serials)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Path(serial): Path<String>,
) -> axum::response::Response {
    match services.serials.find(&serial).await {
        Ok(Some(unit)) => Json(unit).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("serial {serial} not found")),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_notes(
    Extension(services): Extension<Arc<AppServices>>,
    Path(serial): Path<String>,
    Json(body): Json<dto::SerialNotesRequest>,
) -> axum::response::Response {
    match services.serials.update_notes(&serial, body.notes).await {
        Ok(unit) => Json(unit).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
