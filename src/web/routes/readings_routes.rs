use axum::{Router, extract::State, response::Html, routing::get};
use std::sync::Arc;

use crate::db::services::LATEST_READINGS_LIMIT;
use crate::web::{AppState, error::AppError};

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(latest_readings_page))
}

/// Queries the newest readings on every request and renders them.
async fn latest_readings_page(
    State(app_state): State<Arc<AppState>>,
) -> Result<Html<String>, AppError> {
    let readings = app_state
        .store
        .latest_readings(LATEST_READINGS_LIMIT)
        .await?;
    let page = app_state.renderer.render(&readings)?;
    Ok(Html(page))
}
