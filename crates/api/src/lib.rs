//! HTTP gateway for the inventory service.
//!
//! Exposes the item catalog under `/show/items`, plus `/health` and
//! Prometheus `/metrics`, with structured logging (tracing).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use catalog::CatalogService;
use consumer::ConsumerState;
use item_store::ItemStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::{ApiError, StartupError};
use routes::items::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ItemStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let items = Router::new()
        .route("/getAll", get(routes::items::get_all::<S>))
        .route("/addItem", post(routes::items::add_item::<S>))
        .route("/getItemById/{id}", get(routes::items::get_item_by_id::<S>))
        .route("/updateItem/{id}", put(routes::items::update_item::<S>))
        .route("/deleteItem/{id}", delete(routes::items::delete_item::<S>));

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .nest("/show/items", items)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the shared handler state.
pub fn create_state<S: ItemStore + 'static>(
    catalog: Arc<CatalogService<S>>,
    consumer_state: watch::Receiver<ConsumerState>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        catalog,
        consumer_state,
    })
}
