use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod provider;
pub mod repository;
pub mod service;
pub mod state;
pub mod worker;

use config::Config;
use provider::{InMemoryBus, InMemoryCloud};
use repository::{MemoryStore, PgStore, Store};
use state::AppState;
use worker::LocalTaskQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flotilla_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Flotilla Orchestrator...");

    let config = Config::from_env().context("Failed to read configuration")?;
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::info!(
        "Using the simulated cloud provider ({} polls per operation)",
        config.simulated_polls
    );
    let cloud = Arc::new(InMemoryCloud::new(config.simulated_polls));
    let bus = Arc::new(InMemoryBus::new());

    let (queue, receiver) = LocalTaskQueue::new();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(store, cloud, bus, Arc::new(queue.clone()), config);

    let _worker = worker::spawn(state.clone(), queue, receiver);
    let _tickers = worker::spawn_tickers(state.clone());

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
