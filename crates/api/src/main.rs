use std::sync::Arc;

use partsledger_api::config::AppConfig;

#[tokio::main]
async fn main() {
    partsledger_observability::init();

    let config = AppConfig::from_env().expect("invalid configuration");
    let services = partsledger_api::app::services::build_services(&config)
        .await
        .expect("failed to build services");

    let app = partsledger_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
