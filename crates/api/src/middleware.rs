use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use partsledger_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Require an `x-actor-id` header and expose it as [`ActorContext`].
pub async fn actor_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let actor_id = match extract_actor(req.headers()) {
        Ok(id) => id,
        Err(message) => return errors::json_error(StatusCode::UNAUTHORIZED, "missing_actor", message),
    };

    req.extensions_mut().insert(ActorContext::new(actor_id));
    next.run(req).await.into_response()
}

fn extract_actor(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(ACTOR_HEADER)
        .ok_or("x-actor-id header is required")?;

    let header = header.to_str().map_err(|_| "x-actor-id must be ASCII")?;

    header
        .trim()
        .parse()
        .map_err(|_| "x-actor-id must be a UUID")
}
