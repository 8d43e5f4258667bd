use axum::{routing::get, Router};

pub mod common;
pub mod inventory;
pub mod products;
pub mod sales;
pub mod serials;
pub mod system;

/// Router for all endpoints that act on behalf of an actor.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/inventory", inventory::router())
        .nest("/serials", serials::router())
        .nest("/products", products::router())
        .nest("/sales", sales::router())
}
