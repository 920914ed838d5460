// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed [`Store`] implementation.
//!
//! Relational unique constraints are modeled with deterministic document
//! ids (create fails when the document exists): tenants are keyed by api
//! key, vehicles by `{tenant}_{device}`, routes by `{tenant}_{name}`, and a
//! geofence registry collection holds one binding per `{tenant}_{geofence}`.
//! Every call is wrapped in a bounded timeout.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    collections, NewInfraction, NewSegmentRule, NewSpeedZone, NewStop, NewStopRule, Store,
    StoreError, StoreResult,
};
use crate::models::{
    EventType, Fine, Infraction, InfractionStatus, RawEvent, Route, SegmentRule, SpeedZone, Stop,
    StopArrival, StopRule, Tenant, Vehicle,
};

/// One stop per (tenant, geofence id), enforced by this registry's doc ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeofenceBinding {
    tenant_id: i64,
    geofence_id: i64,
    stop_id: i64,
}

/// Firestore database client.
pub struct FirestoreStore {
    client: firestore::FirestoreDb,
    op_timeout: Duration,
    id_gen: AtomicI64,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str, op_timeout: Duration) -> StoreResult<Self> {
        // If the emulator environment variable is set, use unauthenticated
        // connection to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, op_timeout).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client,
            op_timeout,
            id_gen: AtomicI64::new(id_seed()),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, op_timeout: Duration) -> StoreResult<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        // Use ExternalJwtFunctionSource to provide a dummy token without
        // needing a custom TokenSource implementation struct.
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            StoreError::Backend(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client,
            op_timeout,
            id_gen: AtomicI64::new(id_seed()),
        })
    }

    /// Allocate an id. Seeded from the clock at startup, so ids survive
    /// restarts without a counter document; ingestion runs single-instance.
    fn alloc(&self) -> i64 {
        self.id_gen.fetch_add(1, Ordering::Relaxed)
    }

    /// Bound any single storage call to the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(op))?
    }
}

fn id_seed() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(1)
}

/// Map crate errors, keeping create-on-existing-document visible as a
/// conflict so resolvers can re-read.
fn store_err(err: firestore::errors::FirestoreError) -> StoreError {
    use firestore::errors::FirestoreError;
    match err {
        FirestoreError::DataConflictError(conflict) => StoreError::Conflict(conflict.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn tenant_doc_id(api_key: &str) -> String {
    urlencoding::encode(api_key).into_owned()
}

fn vehicle_doc_id(tenant_id: i64, device_id: i64) -> String {
    format!("{}_{}", tenant_id, device_id)
}

fn route_doc_id(tenant_id: i64, name: &str) -> String {
    format!("{}_{}", tenant_id, urlencoding::encode(name))
}

fn geofence_doc_id(tenant_id: i64, geofence_id: i64) -> String {
    format!("{}_{}", tenant_id, geofence_id)
}

#[async_trait]
impl Store for FirestoreStore {
    // ─── Tenants ─────────────────────────────────────────────────

    async fn get_tenant_by_api_key(&self, api_key: &str) -> StoreResult<Option<Tenant>> {
        self.bounded("get_tenant_by_api_key", async {
            self.client
                .fluent()
                .select()
                .by_id_in(collections::TENANTS)
                .obj()
                .one(&tenant_doc_id(api_key))
                .await
                .map_err(store_err)
        })
        .await
    }

    async fn create_tenant(&self, name: &str, api_key: &str, active: bool) -> StoreResult<Tenant> {
        self.bounded("create_tenant", async {
            let tenant = Tenant {
                id: self.alloc(),
                name: name.to_string(),
                api_key: api_key.to_string(),
                active,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::TENANTS)
                .document_id(tenant_doc_id(api_key))
                .object(&tenant)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(tenant)
        })
        .await
    }

    // ─── Raw Events ──────────────────────────────────────────────

    async fn create_raw_event(
        &self,
        tenant_id: i64,
        device_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> StoreResult<RawEvent> {
        self.bounded("create_raw_event", async {
            let event = RawEvent {
                id: self.alloc(),
                tenant_id,
                device_id: device_id.to_string(),
                event_type,
                payload,
                received_at: Utc::now(),
                processed_at: None,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::RAW_EVENTS)
                .document_id(event.id.to_string())
                .object(&event)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(event)
        })
        .await
    }

    async fn get_raw_event(&self, tenant_id: i64, event_id: i64) -> StoreResult<Option<RawEvent>> {
        self.bounded("get_raw_event", async {
            let event: Option<RawEvent> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::RAW_EVENTS)
                .obj()
                .one(&event_id.to_string())
                .await
                .map_err(store_err)?;
            Ok(event.filter(|e| e.tenant_id == tenant_id))
        })
        .await
    }

    async fn mark_event_processed(
        &self,
        tenant_id: i64,
        event_id: i64,
        processed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.bounded("mark_event_processed", async {
            let mut event = self
                .get_raw_event(tenant_id, event_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("raw event {event_id}")))?;
            event.processed_at = Some(processed_at);

            let _: () = self
                .client
                .fluent()
                .update()
                .in_col(collections::RAW_EVENTS)
                .document_id(event.id.to_string())
                .object(&event)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    // ─── Vehicles ────────────────────────────────────────────────

    async fn get_vehicle_by_device(
        &self,
        tenant_id: i64,
        device_id: i64,
    ) -> StoreResult<Option<Vehicle>> {
        self.bounded("get_vehicle_by_device", async {
            self.client
                .fluent()
                .select()
                .by_id_in(collections::VEHICLES)
                .obj()
                .one(&vehicle_doc_id(tenant_id, device_id))
                .await
                .map_err(store_err)
        })
        .await
    }

    async fn create_vehicle(
        &self,
        tenant_id: i64,
        device_id: i64,
        plate: &str,
    ) -> StoreResult<Vehicle> {
        self.bounded("create_vehicle", async {
            let vehicle = Vehicle {
                id: self.alloc(),
                tenant_id,
                device_id,
                plate: plate.to_string(),
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::VEHICLES)
                .document_id(vehicle_doc_id(tenant_id, device_id))
                .object(&vehicle)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(vehicle)
        })
        .await
    }

    async fn list_vehicles(&self, tenant_id: i64) -> StoreResult<Vec<Vehicle>> {
        self.bounded("list_vehicles", async {
            let mut vehicles: Vec<Vehicle> = self
                .client
                .fluent()
                .select()
                .from(collections::VEHICLES)
                .filter(|q| q.for_all([q.field("tenant_id").eq(tenant_id)]))
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            vehicles.sort_by_key(|v| v.id);
            Ok(vehicles)
        })
        .await
    }

    // ─── Routes ──────────────────────────────────────────────────

    async fn get_route_by_name(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Route>> {
        self.bounded("get_route_by_name", async {
            self.client
                .fluent()
                .select()
                .by_id_in(collections::ROUTES)
                .obj()
                .one(&route_doc_id(tenant_id, name))
                .await
                .map_err(store_err)
        })
        .await
    }

    async fn create_route(&self, tenant_id: i64, name: &str) -> StoreResult<Route> {
        self.bounded("create_route", async {
            let route = Route {
                id: self.alloc(),
                tenant_id,
                name: name.to_string(),
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::ROUTES)
                .document_id(route_doc_id(tenant_id, name))
                .object(&route)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(route)
        })
        .await
    }

    // ─── Stops ───────────────────────────────────────────────────

    async fn get_stop_by_geofence(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<Stop>> {
        self.bounded("get_stop_by_geofence", async {
            let binding: Option<GeofenceBinding> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::STOP_GEOFENCES)
                .obj()
                .one(&geofence_doc_id(tenant_id, geofence_id))
                .await
                .map_err(store_err)?;

            let Some(binding) = binding else {
                return Ok(None);
            };

            let stop: Option<Stop> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::STOPS)
                .obj()
                .one(&binding.stop_id.to_string())
                .await
                .map_err(store_err)?;

            if stop.is_none() {
                // An interrupted create can leave a claim with no stop
                // behind it; release it so the geofence id can be claimed
                // again.
                tracing::warn!(
                    tenant_id,
                    geofence_id,
                    stop_id = binding.stop_id,
                    "Releasing orphaned geofence claim"
                );
                let _ = self
                    .client
                    .fluent()
                    .delete()
                    .from(collections::STOP_GEOFENCES)
                    .document_id(geofence_doc_id(tenant_id, geofence_id))
                    .execute()
                    .await;
            }

            Ok(stop)
        })
        .await
    }

    async fn get_stop_by_name_ci(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Stop>> {
        self.bounded("get_stop_by_name_ci", async {
            // Firestore cannot case-fold in a query; tenants have at most a
            // few hundred stops, so fold client side.
            let stops: Vec<Stop> = self
                .client
                .fluent()
                .select()
                .from(collections::STOPS)
                .filter(|q| q.for_all([q.field("tenant_id").eq(tenant_id)]))
                .obj()
                .query()
                .await
                .map_err(store_err)?;

            let wanted = name.to_lowercase();
            Ok(stops.into_iter().find(|s| s.name.to_lowercase() == wanted))
        })
        .await
    }

    async fn create_stop(&self, stop: NewStop) -> StoreResult<Stop> {
        self.bounded("create_stop", async {
            let created = Stop {
                id: self.alloc(),
                tenant_id: stop.tenant_id,
                route_id: stop.route_id,
                name: stop.name,
                geofence_id: stop.geofence_id,
                geometry: stop.geometry,
                anchor: stop.anchor,
                sort_order: stop.sort_order,
                geometry_note: stop.geometry_note,
            };

            // Claim the geofence id first; losing this insert is how a
            // concurrent import of the same geofence gets detected.
            if let Some(geofence_id) = created.geofence_id {
                let binding = GeofenceBinding {
                    tenant_id: created.tenant_id,
                    geofence_id,
                    stop_id: created.id,
                };
                let _: () = self
                    .client
                    .fluent()
                    .insert()
                    .into(collections::STOP_GEOFENCES)
                    .document_id(geofence_doc_id(created.tenant_id, geofence_id))
                    .object(&binding)
                    .execute()
                    .await
                    .map_err(store_err)?;
            }

            let insert = async {
                let _: () = self
                    .client
                    .fluent()
                    .insert()
                    .into(collections::STOPS)
                    .document_id(created.id.to_string())
                    .object(&created)
                    .execute()
                    .await
                    .map_err(store_err)?;
                Ok::<_, StoreError>(())
            };

            if let Err(err) = insert.await {
                // Release the claim so a retry is not wedged.
                if let Some(geofence_id) = created.geofence_id {
                    let _ = self
                        .client
                        .fluent()
                        .delete()
                        .from(collections::STOP_GEOFENCES)
                        .document_id(geofence_doc_id(created.tenant_id, geofence_id))
                        .execute()
                        .await;
                }
                return Err(err);
            }

            Ok(created)
        })
        .await
    }

    async fn set_stop_geofence(
        &self,
        tenant_id: i64,
        stop_id: i64,
        geofence_id: i64,
    ) -> StoreResult<()> {
        self.bounded("set_stop_geofence", async {
            let stop: Option<Stop> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::STOPS)
                .obj()
                .one(&stop_id.to_string())
                .await
                .map_err(store_err)?;

            let mut stop = stop
                .filter(|s| s.tenant_id == tenant_id)
                .ok_or_else(|| StoreError::NotFound(format!("stop {stop_id}")))?;

            match stop.geofence_id {
                Some(existing) if existing == geofence_id => return Ok(()),
                Some(existing) => {
                    return Err(StoreError::Conflict(format!(
                        "stop {stop_id} already bound to geofence {existing}"
                    )))
                }
                None => {}
            }

            let binding = GeofenceBinding {
                tenant_id,
                geofence_id,
                stop_id,
            };
            let claimed: StoreResult<()> = self
                .client
                .fluent()
                .insert()
                .into(collections::STOP_GEOFENCES)
                .document_id(geofence_doc_id(tenant_id, geofence_id))
                .object(&binding)
                .execute()
                .await
                .map_err(store_err);

            if let Err(StoreError::Conflict(msg)) = &claimed {
                // Another writer may have bound the same pair; that is fine.
                let existing: Option<GeofenceBinding> = self
                    .client
                    .fluent()
                    .select()
                    .by_id_in(collections::STOP_GEOFENCES)
                    .obj()
                    .one(&geofence_doc_id(tenant_id, geofence_id))
                    .await
                    .map_err(store_err)?;
                match existing {
                    Some(b) if b.stop_id == stop_id => {}
                    _ => return Err(StoreError::Conflict(msg.clone())),
                }
            } else {
                claimed?;
            }

            stop.geofence_id = Some(geofence_id);
            let _: () = self
                .client
                .fluent()
                .update()
                .in_col(collections::STOPS)
                .document_id(stop.id.to_string())
                .object(&stop)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(())
        })
        .await
    }

    async fn count_route_stops(&self, tenant_id: i64, route_id: i64) -> StoreResult<u32> {
        self.bounded("count_route_stops", async {
            let stops: Vec<Stop> = self
                .client
                .fluent()
                .select()
                .from(collections::STOPS)
                .filter(|q| {
                    q.for_all([
                        q.field("tenant_id").eq(tenant_id),
                        q.field("route_id").eq(route_id),
                    ])
                })
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            Ok(stops.len() as u32)
        })
        .await
    }

    async fn list_stops(&self, tenant_id: i64) -> StoreResult<Vec<Stop>> {
        self.bounded("list_stops", async {
            let mut stops: Vec<Stop> = self
                .client
                .fluent()
                .select()
                .from(collections::STOPS)
                .filter(|q| q.for_all([q.field("tenant_id").eq(tenant_id)]))
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            stops.sort_by_key(|s| s.id);
            Ok(stops)
        })
        .await
    }

    // ─── Stop Arrivals ───────────────────────────────────────────

    async fn create_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        arrived_at: DateTime<Utc>,
    ) -> StoreResult<StopArrival> {
        self.bounded("create_arrival", async {
            let arrival = StopArrival {
                id: self.alloc(),
                tenant_id,
                vehicle_id,
                stop_id,
                arrived_at,
                departed_at: None,
                dwell_minutes: None,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::ARRIVALS)
                .document_id(arrival.id.to_string())
                .object(&arrival)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(arrival)
        })
        .await
    }

    async fn get_open_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
    ) -> StoreResult<Option<StopArrival>> {
        self.bounded("get_open_arrival", async {
            let arrivals: Vec<StopArrival> = self
                .client
                .fluent()
                .select()
                .from(collections::ARRIVALS)
                .filter(|q| {
                    q.for_all([
                        q.field("tenant_id").eq(tenant_id),
                        q.field("vehicle_id").eq(vehicle_id),
                        q.field("stop_id").eq(stop_id),
                    ])
                })
                .obj()
                .query()
                .await
                .map_err(store_err)?;

            Ok(arrivals
                .into_iter()
                .filter(|a| a.is_open())
                .max_by_key(|a| a.arrived_at))
        })
        .await
    }

    async fn close_arrival(
        &self,
        tenant_id: i64,
        arrival_id: i64,
        departed_at: DateTime<Utc>,
        dwell_minutes: Option<i64>,
    ) -> StoreResult<StopArrival> {
        self.bounded("close_arrival", async {
            let arrival: Option<StopArrival> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::ARRIVALS)
                .obj()
                .one(&arrival_id.to_string())
                .await
                .map_err(store_err)?;

            let mut arrival = arrival
                .filter(|a| a.tenant_id == tenant_id)
                .ok_or_else(|| StoreError::NotFound(format!("arrival {arrival_id}")))?;
            arrival.departed_at = Some(departed_at);
            arrival.dwell_minutes = dwell_minutes;

            let _: () = self
                .client
                .fluent()
                .update()
                .in_col(collections::ARRIVALS)
                .document_id(arrival.id.to_string())
                .object(&arrival)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(arrival)
        })
        .await
    }

    async fn get_latest_closed_arrival_excluding(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        exclude_stop_id: i64,
    ) -> StoreResult<Option<StopArrival>> {
        self.bounded("get_latest_closed_arrival_excluding", async {
            let arrivals: Vec<StopArrival> = self
                .client
                .fluent()
                .select()
                .from(collections::ARRIVALS)
                .filter(|q| {
                    q.for_all([
                        q.field("tenant_id").eq(tenant_id),
                        q.field("vehicle_id").eq(vehicle_id),
                    ])
                })
                .obj()
                .query()
                .await
                .map_err(store_err)?;

            Ok(arrivals
                .into_iter()
                .filter(|a| {
                    a.stop_id != exclude_stop_id
                        && a.departed_at.is_some()
                        && a.dwell_minutes.is_some()
                })
                .max_by_key(|a| a.departed_at))
        })
        .await
    }

    async fn list_arrivals(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
    ) -> StoreResult<Vec<StopArrival>> {
        self.bounded("list_arrivals", async {
            let mut arrivals: Vec<StopArrival> = self
                .client
                .fluent()
                .select()
                .from(collections::ARRIVALS)
                .filter(|q| {
                    q.for_all([
                        q.field("tenant_id").eq(tenant_id),
                        q.field("vehicle_id").eq(vehicle_id),
                    ])
                })
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            arrivals.sort_by_key(|a| a.id);
            Ok(arrivals)
        })
        .await
    }

    // ─── Rules ───────────────────────────────────────────────────

    async fn get_stop_rule(&self, tenant_id: i64, stop_id: i64) -> StoreResult<Option<StopRule>> {
        self.bounded("get_stop_rule", async {
            let rule: Option<StopRule> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::STOP_RULES)
                .obj()
                .one(&format!("{}_{}", tenant_id, stop_id))
                .await
                .map_err(store_err)?;
            Ok(rule.filter(|r| r.active))
        })
        .await
    }

    async fn create_stop_rule(&self, rule: NewStopRule) -> StoreResult<StopRule> {
        self.bounded("create_stop_rule", async {
            let created = StopRule {
                id: self.alloc(),
                tenant_id: rule.tenant_id,
                stop_id: rule.stop_id,
                min_dwell_minutes: rule.min_dwell_minutes,
                max_dwell_minutes: rule.max_dwell_minutes,
                fine_amount_usd: rule.fine_amount_usd,
                penalty_per_minute_usd: rule.penalty_per_minute_usd,
                active: rule.active,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::STOP_RULES)
                .document_id(format!("{}_{}", created.tenant_id, created.stop_id))
                .object(&created)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(created)
        })
        .await
    }

    async fn get_segment_rule(
        &self,
        tenant_id: i64,
        from_stop_id: i64,
        to_stop_id: i64,
    ) -> StoreResult<Option<SegmentRule>> {
        self.bounded("get_segment_rule", async {
            let rule: Option<SegmentRule> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::SEGMENT_RULES)
                .obj()
                .one(&format!("{}_{}_{}", tenant_id, from_stop_id, to_stop_id))
                .await
                .map_err(store_err)?;
            Ok(rule.filter(|r| r.active))
        })
        .await
    }

    async fn create_segment_rule(&self, rule: NewSegmentRule) -> StoreResult<SegmentRule> {
        self.bounded("create_segment_rule", async {
            let created = SegmentRule {
                id: self.alloc(),
                tenant_id: rule.tenant_id,
                route_id: rule.route_id,
                from_stop_id: rule.from_stop_id,
                to_stop_id: rule.to_stop_id,
                expected_min_minutes: rule.expected_min_minutes,
                expected_max_minutes: rule.expected_max_minutes,
                fine_amount_usd: rule.fine_amount_usd,
                penalty_per_minute_usd: rule.penalty_per_minute_usd,
                active: rule.active,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::SEGMENT_RULES)
                .document_id(format!(
                    "{}_{}_{}",
                    created.tenant_id, created.from_stop_id, created.to_stop_id
                ))
                .object(&created)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(created)
        })
        .await
    }

    async fn get_speed_zone(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<SpeedZone>> {
        self.bounded("get_speed_zone", async {
            let zone: Option<SpeedZone> = self
                .client
                .fluent()
                .select()
                .by_id_in(collections::SPEED_ZONES)
                .obj()
                .one(&format!("{}_{}", tenant_id, geofence_id))
                .await
                .map_err(store_err)?;
            Ok(zone.filter(|z| z.active))
        })
        .await
    }

    async fn create_speed_zone(&self, zone: NewSpeedZone) -> StoreResult<SpeedZone> {
        self.bounded("create_speed_zone", async {
            let created = SpeedZone {
                id: self.alloc(),
                tenant_id: zone.tenant_id,
                geofence_id: zone.geofence_id,
                stop_id: zone.stop_id,
                route_id: zone.route_id,
                max_speed_kmh: zone.max_speed_kmh,
                fine_amount_usd: zone.fine_amount_usd,
                penalty_per_kmh_usd: zone.penalty_per_kmh_usd,
                active: zone.active,
            };
            let _: () = self
                .client
                .fluent()
                .insert()
                .into(collections::SPEED_ZONES)
                .document_id(format!("{}_{}", created.tenant_id, created.geofence_id))
                .object(&created)
                .execute()
                .await
                .map_err(store_err)?;
            Ok(created)
        })
        .await
    }

    // ─── Infractions & Fines ─────────────────────────────────────

    /// Infraction and fine commit together or not at all.
    async fn create_infraction_with_fine(
        &self,
        infraction: NewInfraction,
        amount_usd: Decimal,
    ) -> StoreResult<(Infraction, Fine)> {
        self.bounded("create_infraction_with_fine", async {
            let created = Infraction {
                id: self.alloc(),
                tenant_id: infraction.tenant_id,
                vehicle_id: infraction.vehicle_id,
                kind: infraction.kind,
                detected_at: infraction.detected_at,
                detail: infraction.detail,
                status: InfractionStatus::Pending,
            };
            let fine = Fine {
                id: self.alloc(),
                tenant_id: created.tenant_id,
                infraction_id: created.id,
                amount_usd,
            };

            let mut transaction = self
                .client
                .begin_transaction()
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))?;

            self.client
                .fluent()
                .update()
                .in_col(collections::INFRACTIONS)
                .document_id(created.id.to_string())
                .object(&created)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    StoreError::Backend(format!("Failed to add infraction to transaction: {}", e))
                })?;

            self.client
                .fluent()
                .update()
                .in_col(collections::FINES)
                .document_id(fine.id.to_string())
                .object(&fine)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    StoreError::Backend(format!("Failed to add fine to transaction: {}", e))
                })?;

            transaction
                .commit()
                .await
                .map_err(|e| StoreError::Backend(format!("Transaction commit failed: {}", e)))?;

            Ok((created, fine))
        })
        .await
    }

    async fn list_infractions(&self, tenant_id: i64) -> StoreResult<Vec<Infraction>> {
        self.bounded("list_infractions", async {
            let mut infractions: Vec<Infraction> = self
                .client
                .fluent()
                .select()
                .from(collections::INFRACTIONS)
                .filter(|q| q.for_all([q.field("tenant_id").eq(tenant_id)]))
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            infractions.sort_by_key(|i| i.id);
            Ok(infractions)
        })
        .await
    }

    async fn list_fines(&self, tenant_id: i64) -> StoreResult<Vec<Fine>> {
        self.bounded("list_fines", async {
            let mut fines: Vec<Fine> = self
                .client
                .fluent()
                .select()
                .from(collections::FINES)
                .filter(|q| q.for_all([q.field("tenant_id").eq(tenant_id)]))
                .obj()
                .query()
                .await
                .map_err(store_err)?;
            fines.sort_by_key(|f| f.id);
            Ok(fines)
        })
        .await
    }
}
