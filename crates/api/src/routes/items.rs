//! Item catalog endpoints under `/show/items`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use catalog::CatalogService;
use consumer::ConsumerState;
use item_store::{Item, ItemPatch, ItemStore, NewItem};
use tokio::sync::watch;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: ItemStore> {
    pub catalog: Arc<CatalogService<S>>,
    pub consumer_state: watch::Receiver<ConsumerState>,
}

/// GET /show/items/getAll
#[tracing::instrument(skip(state))]
pub async fn get_all<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Item>>, ApiError> {
    let items = state.catalog.list().await?;
    Ok(Json(items))
}

/// POST /show/items/addItem
///
/// Server-managed fields in the body (`id`, timestamps) are ignored.
#[tracing::instrument(skip(state, payload))]
pub async fn add_item<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> Result<Json<Item>, ApiError> {
    let Json(item) = payload?;
    let created = state.catalog.create(item).await?;
    Ok(Json(created))
}

/// GET /show/items/getItemById/{id}
#[tracing::instrument(skip(state))]
pub async fn get_item_by_id<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    let item = state.catalog.get_by_id(&id).await?;
    Ok(Json(item))
}

/// PUT /show/items/updateItem/{id}
///
/// Applies a partial update and returns the item as stored afterwards.
#[tracing::instrument(skip(state, payload))]
pub async fn update_item<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<ItemPatch>, JsonRejection>,
) -> Result<Json<Item>, ApiError> {
    let Json(patch) = payload?;
    let item = state.catalog.update_by_id(&id, patch).await?;
    Ok(Json(item))
}

/// DELETE /show/items/deleteItem/{id}
///
/// Returns the item as it was before deletion.
#[tracing::instrument(skip(state))]
pub async fn delete_item<S: ItemStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    let item = state.catalog.delete_by_id(&id).await?;
    Ok(Json(item))
}
