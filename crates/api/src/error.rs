//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use catalog::CatalogError;
use item_store::StoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Catalog operation error.
    Catalog(CatalogError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Catalog(err) => catalog_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn catalog_error_to_response(err: CatalogError) -> (StatusCode, String) {
    let status = match &err {
        CatalogError::Validation(_) | CatalogError::InvalidId(_) => StatusCode::BAD_REQUEST,
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::DuplicateName(_) | CatalogError::InsufficientStock { .. } => {
            StatusCode::CONFLICT
        }
        CatalogError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CatalogError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "catalog request failed");
    }
    (status, err.to_string())
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Failures that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Item store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Database configuration error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
