//! Sourcer Orchestrator
//!
//! The gateway process: accepts submissions, owns the run queue and the
//! durable run records, relays progress events through Postgres and fans
//! them out to WebSocket observers.

use sourcer_engine::queue::Dispatcher;
use sourcer_engine::safety::SafetyGate;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod gateway;
pub mod pg;
pub mod repository;
pub mod service;

use crate::api::AppState;
use crate::config::Config;
use crate::gateway::ConnectionRegistry;
use crate::pg::{PgRelay, PgRunQueue, PgRunStore};
use crate::service::safety_service;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sourcer_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sourcer Orchestrator...");

    let config = Config::from_env().expect("Invalid configuration");
    config.validate().expect("Invalid configuration");
    let config = Arc::new(config);

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let gate = Arc::new(SafetyGate::new(
        config.embedder.build(),
        config.safety_threshold,
    ));
    match safety_service::load_index(&pool, &gate).await {
        Ok(count) => tracing::info!("Safety gate ready with {} banned terms", count),
        // Checks still answer, every term reads as safe until terms are added
        Err(e) => tracing::error!("Failed to load banned terms: {:?}", e),
    }

    let queue = Arc::new(PgRunQueue::new(pool.clone(), config.run_lease));
    let relay = Arc::new(PgRelay::new(pool.clone()));
    let registry = Arc::new(ConnectionRegistry::new());

    gateway::bridge::spawn(relay.clone(), registry.clone(), config.topic.clone());

    let state = AppState {
        pool: pool.clone(),
        dispatcher: Dispatcher::new(queue.clone()),
        queue,
        publisher: relay,
        store: Arc::new(PgRunStore::new(pool)),
        registry,
        gate,
        config: config.clone(),
    };

    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
