// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook route for inbound tracking events.

use crate::error::{AppError, Result};
use crate::models::{EventType, Tenant};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(handle_event))
}

/// Authenticate the calling tenant from the `x-api-key` header.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Tenant> {
    let Some(api_key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        tracing::warn!("Webhook call without x-api-key header");
        return Err(AppError::Unauthorized);
    };

    let Some(tenant) = state.store.get_tenant_by_api_key(api_key).await? else {
        tracing::warn!("Webhook call with unknown API key");
        return Err(AppError::Unauthorized);
    };
    if !tenant.active {
        tracing::warn!(tenant_id = tenant.id, "Webhook call for inactive tenant");
        return Err(AppError::Unauthorized);
    }
    Ok(tenant)
}

/// The vendor sends `deviceId` as either a string or a number.
fn extract_device_id(payload: &Value) -> Option<String> {
    match payload.get("deviceId") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Handle an inbound tracking event (POST).
///
/// The raw event is archived synchronously so it survives any downstream
/// failure; detection runs on the worker queue after the 202 goes out.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse> {
    let tenant = authenticate(&state, &headers).await?;
    tracing::debug!(tenant_id = tenant.id, payload = %payload, "Webhook event received");

    let device_id = extract_device_id(&payload)
        .ok_or_else(|| AppError::BadRequest("deviceId is required".to_string()))?;
    let raw_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest("type is required".to_string()))?
        .to_string();
    let event_type = EventType::from_vendor(&raw_type);

    let event = state
        .store
        .create_raw_event(tenant.id, &device_id, event_type, payload)
        .await?;
    tracing::info!(
        tenant_id = tenant.id,
        event_id = event.id,
        device_id = %event.device_id,
        event_type = ?event_type,
        vendor_type = %raw_type,
        "Event archived"
    );

    if let Err(err) = state.queue.dispatch(event).await {
        // The archived event stays available for manual replay; the caller
        // still gets its 202 so the vendor does not re-send.
        tracing::error!(
            tenant_id = tenant.id,
            error = %err,
            "Failed to dispatch event for detection"
        );
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "message": "accepted" }))))
}
