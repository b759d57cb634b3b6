use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] StoreError),
    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Details go to the log; the client only sees the status.
        let (status, message) = match &self {
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sensor readings are unavailable right now.",
            ),
            AppError::TemplateError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "The page could not be rendered.",
            ),
        };
        error!(error = %self, status = %status, "Request failed");
        let body = format!(
            "<!DOCTYPE html>\n<html lang=\"en\"><head><title>Error</title></head><body><h1>{}</h1><p>{}</p></body></html>",
            status, message
        );
        (status, Html(body)).into_response()
    }
}
