// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use fleetfine::config::Config;
use fleetfine::models::Tenant;
use fleetfine::routes::create_router;
use fleetfine::services::{EventPipeline, InlineQueue};
use fleetfine::store::{MemoryStore, Store};
use fleetfine::AppState;
use std::sync::Arc;

/// API key of the tenant seeded by [`create_test_app`].
#[allow(dead_code)]
pub const TEST_API_KEY: &str = "test-api-key";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a store backed by the Firestore emulator.
#[allow(dead_code)]
pub async fn test_store() -> fleetfine::store::FirestoreStore {
    fleetfine::store::FirestoreStore::new("test-project", std::time::Duration::from_secs(10))
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app over the in-memory store with a synchronous queue,
/// seeded with one active tenant. Returns the router, the shared state,
/// and the seeded tenant.
#[allow(dead_code)]
pub async fn create_test_app() -> (axum::Router, Arc<AppState>, Tenant) {
    let config = Config::default();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let tenant = store
        .create_tenant("test-tenant", TEST_API_KEY, true)
        .await
        .expect("Failed to seed tenant");

    let pipeline = Arc::new(EventPipeline::new(
        Arc::clone(&store),
        config.default_geofence_radius_m,
    ));
    let state = Arc::new(AppState {
        config,
        store,
        queue: Arc::new(InlineQueue::new(pipeline)),
    });

    (create_router(state.clone()), state, tenant)
}

/// POST a JSON body to `/webhook`, optionally with an `x-api-key` header.
#[allow(dead_code)]
pub async fn post_webhook(
    app: &axum::Router,
    api_key: Option<&str>,
    body: &serde_json::Value,
) -> axum::response::Response {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }

    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

/// Parse a response body as JSON.
#[allow(dead_code)]
pub async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
