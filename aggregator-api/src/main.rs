//! Serve the event aggregator over HTTP.
use std::sync::Arc;

use aggregator_common::metrics::{serve, setup_metrics_routes};
use aggregator_common::store::DedupStore;
use aggregator_worker::aggregator::EventAggregator;
use axum::Router;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

mod config;
mod handlers;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;

    let store = DedupStore::new(&config.database_path, config.max_db_connections)
        .await
        .wrap_err_with(|| format!("failed to open dedup store at {}", config.database_path))?;

    let aggregator =
        Arc::new(EventAggregator::start(&config.pipeline, Arc::new(store.clone())).await);

    let app = handlers::add_routes(
        Router::new(),
        aggregator.clone(),
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = match config.export_prometheus {
        true => setup_metrics_routes(app).wrap_err("failed to install prometheus recorder")?,
        false => app,
    };

    let bind = config.bind();
    info!("listening on {}", bind);
    let served = serve(app, &bind, shutdown()).await;

    // Events already queued are processed before the store goes away.
    aggregator.shutdown().await;
    store.close().await;

    served.wrap_err("failed to serve event aggregator api")
}
