use axum::{Router, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::db::services::ReadingStore;
use crate::web::templates::PageRenderer;

pub mod error;
pub mod routes;
pub mod templates;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub renderer: Arc<PageRenderer>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::create_router())
        .route("/health", get(health_check_handler))
        .with_state(app_state)
}

pub async fn run_http_server(
    app_state: Arc<AppState>,
    http_addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app_router = create_axum_router(app_state);

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!(address = %http_addr, "HTTP server listening");
    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown)
        .await
}
