//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use item_store::ItemStore;
use serde::Serialize;

use crate::routes::items::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub consumer: &'static str,
}

/// GET /health returns process liveness and the order consumer's state.
pub async fn check<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let consumer = state.consumer_state.borrow().as_str();
    Json(HealthResponse {
        status: "ok",
        consumer,
    })
}
