// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fleetfine API Server
//!
//! Ingests vehicle-tracking webhooks, resolves them against each tenant's
//! stop model, and turns rule violations into infractions and fines.

use std::sync::Arc;
use std::time::Duration;

use fleetfine::{
    config::{Config, StoreBackend},
    services::{BoundedQueue, EventPipeline},
    store::{FirestoreStore, MemoryStore, Store},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Fleetfine API");

    // Initialize storage
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Firestore => {
            let store = FirestoreStore::new(
                &config.gcp_project_id,
                Duration::from_secs(config.store_timeout_secs),
            )
            .await
            .expect("Failed to connect to Firestore");
            Arc::new(store)
        }
    };

    // Start the detection worker pool
    let pipeline = Arc::new(EventPipeline::new(
        Arc::clone(&store),
        config.default_geofence_radius_m,
    ));
    let queue = Arc::new(BoundedQueue::start(
        pipeline,
        config.queue_capacity,
        config.worker_count,
    ));
    tracing::info!(
        capacity = config.queue_capacity,
        workers = config.worker_count,
        "Detection queue started"
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        queue,
    });

    // Build router
    let app = fleetfine::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetfine=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
