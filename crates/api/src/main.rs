//! Inventory service entry point.

use std::process::ExitCode;
use std::sync::Arc;

use api::{Config, LogFormat, StartupError};
use catalog::{CatalogService, StorePolicy};
use common::Backoff;
use consumer::{ConsumerState, OrderConsumer, OrderProcessor};
use item_store::{InMemoryItemStore, ItemStore, PostgresItemStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MIGRATION_ATTEMPTS: u32 = 5;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    init_tracing(&config);

    match run(config).await {
        Ok(()) => {
            tracing::info!("server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "inventory service failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let metrics_handle = api::routes::metrics::install_recorder()?;

    match config.database_url.clone() {
        Some(url) => {
            let store = connect_postgres(&config, &url).await?;
            serve(config, store, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory item store");
            serve(config, InMemoryItemStore::new(), metrics_handle).await
        }
    }
}

/// Builds a lazily connecting pool and applies migrations, retrying while
/// the database comes up.
async fn connect_postgres(config: &Config, url: &str) -> Result<PostgresItemStore, StartupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect_lazy(url)?;
    let store = PostgresItemStore::new(pool);

    let backoff = Backoff::new(
        std::time::Duration::from_millis(500),
        std::time::Duration::from_secs(10),
    );
    let mut attempt = 0;
    loop {
        match store.run_migrations().await {
            Ok(()) => {
                tracing::info!("database migrations applied");
                return Ok(store);
            }
            Err(err) if attempt + 1 < MIGRATION_ATTEMPTS && err.is_transient() => {
                let delay = backoff.delay(attempt);
                tracing::warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "database not ready");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn serve<S: ItemStore + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) -> Result<(), StartupError> {
    let policy = StorePolicy::new(config.store_timeout, config.store_max_attempts);
    let catalog = Arc::new(CatalogService::with_policy(store, policy));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (consumer_state, consumer_task) = if config.consumer.enabled {
        let consumer = OrderConsumer::new(
            config.consumer.clone(),
            OrderProcessor::new(Arc::clone(&catalog)),
        );
        let state = consumer.state();
        (state, Some(tokio::spawn(consumer.run(shutdown_rx))))
    } else {
        tracing::info!("order consumer disabled");
        let (_, state) = watch::channel(ConsumerState::Stopped);
        (state, None)
    };

    let app = api::create_app(api::create_state(catalog, consumer_state), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting inventory service");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(task) = consumer_task
        && let Err(err) = task.await
    {
        tracing::error!(error = %err, "order consumer task failed");
    }
    Ok(())
}
