// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-event detection pipeline.
//!
//! One event runs as a single sequential unit: resolve the vehicle, then
//! dispatch on event type into arrival tracking and the rule checks. The
//! processed-at stamp lands only after every step succeeded, so a failed
//! event keeps its archived record unstamped and can be replayed by hand.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{EventType, RawEvent, Vehicle};
use crate::services::arrivals::ArrivalTracker;
use crate::services::evaluator::RuleEvaluator;
use crate::services::stops::{extract_geofence_ref, extract_position, StopResolver};
use crate::services::vehicles::{parse_device_id, VehicleResolver};
use crate::store::Store;
use crate::time_utils::parse_rfc3339;

/// Runs the full detection sequence for one archived event.
pub struct EventPipeline {
    store: Arc<dyn Store>,
    vehicles: VehicleResolver,
    stops: StopResolver,
    arrivals: ArrivalTracker,
    evaluator: RuleEvaluator,
}

impl EventPipeline {
    pub fn new(store: Arc<dyn Store>, default_geofence_radius_m: f64) -> Self {
        Self {
            vehicles: VehicleResolver::new(Arc::clone(&store)),
            stops: StopResolver::new(Arc::clone(&store), default_geofence_radius_m),
            arrivals: ArrivalTracker::new(Arc::clone(&store)),
            evaluator: RuleEvaluator::new(Arc::clone(&store)),
            store,
        }
    }

    /// Process one event to completion.
    ///
    /// Every event type keeps the vehicle registry current; only geofence
    /// transitions and overspeed alarms reach the rule checks.
    pub async fn process(&self, event: RawEvent) -> Result<()> {
        let occurred_at = event_time(&event);
        let device = parse_device_id(&event.device_id)
            .map_err(|err| AppError::InvalidDevice(err.to_string()))?;
        let vehicle = self
            .vehicles
            .resolve(event.tenant_id, &device, &event.payload)
            .await?;

        match event.event_type {
            EventType::GeofenceEnter => self.handle_enter(&event, &vehicle, occurred_at).await?,
            EventType::GeofenceExit => self.handle_exit(&event, &vehicle, occurred_at).await?,
            EventType::OverspeedAlarm => {
                self.evaluator
                    .check_overspeed(event.tenant_id, vehicle.id, &event.payload, occurred_at)
                    .await?;
            }
            EventType::Position | EventType::Ignition | EventType::Other => {}
        }

        self.store
            .mark_event_processed(event.tenant_id, event.id, Utc::now())
            .await?;
        tracing::debug!(
            tenant_id = event.tenant_id,
            event_id = event.id,
            vehicle_id = vehicle.id,
            event_type = ?event.event_type,
            "Event processed"
        );
        Ok(())
    }

    /// Geofence enter: open an arrival, check the segment from the previous
    /// departure, then the speed zone.
    async fn handle_enter(
        &self,
        event: &RawEvent,
        vehicle: &Vehicle,
        arrived_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(gref) = extract_geofence_ref(&event.payload) else {
            tracing::debug!(
                tenant_id = event.tenant_id,
                event_id = event.id,
                "Enter event carries no geofence context"
            );
            return Ok(());
        };
        let stop = self
            .stops
            .resolve(event.tenant_id, &gref, extract_position(&event.payload))
            .await?;

        self.arrivals
            .record_enter(event.tenant_id, vehicle.id, stop.id, arrived_at)
            .await?;

        if let Some(anchor) = self
            .arrivals
            .segment_anchor(event.tenant_id, vehicle.id, stop.id)
            .await?
        {
            self.evaluator
                .check_segment(event.tenant_id, vehicle.id, &anchor, stop.id, arrived_at)
                .await?;
        }

        self.evaluator
            .check_overspeed(event.tenant_id, vehicle.id, &event.payload, arrived_at)
            .await?;
        Ok(())
    }

    /// Geofence exit: close the open arrival, check its dwell, then the
    /// speed zone. An exit with no matching open arrival changes nothing.
    async fn handle_exit(
        &self,
        event: &RawEvent,
        vehicle: &Vehicle,
        departed_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(gref) = extract_geofence_ref(&event.payload) else {
            tracing::debug!(
                tenant_id = event.tenant_id,
                event_id = event.id,
                "Exit event carries no geofence context"
            );
            return Ok(());
        };
        let stop = self
            .stops
            .resolve(event.tenant_id, &gref, extract_position(&event.payload))
            .await?;

        if let Some(closed) = self
            .arrivals
            .record_exit(event.tenant_id, vehicle.id, stop.id, departed_at)
            .await?
        {
            if let Some(dwell) = closed.dwell_minutes {
                self.evaluator
                    .check_dwell(event.tenant_id, vehicle.id, stop.id, dwell, departed_at)
                    .await?;
            }
        }

        self.evaluator
            .check_overspeed(event.tenant_id, vehicle.id, &event.payload, departed_at)
            .await?;
        Ok(())
    }
}

/// When the event happened: the vendor's `serverTime` when parseable,
/// otherwise when we received it.
fn event_time(event: &RawEvent) -> DateTime<Utc> {
    event
        .payload
        .get("serverTime")
        .and_then(Value::as_str)
        .and_then(parse_rfc3339)
        .unwrap_or(event.received_at)
}
