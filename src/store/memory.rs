// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store backed by dashmap.
//!
//! Backs tests and `STORE=memory` local development. Uniqueness constraints
//! are enforced through index maps using the entry API, so concurrent
//! creates lose with `Conflict` exactly like the Firestore backend.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::{
    NewInfraction, NewSegmentRule, NewSpeedZone, NewStop, NewStopRule, Store, StoreError,
    StoreResult,
};
use crate::models::{
    EventType, Fine, Infraction, InfractionStatus, RawEvent, Route, SegmentRule, SpeedZone, Stop,
    StopArrival, StopRule, Tenant, Vehicle,
};

/// In-memory [`Store`] implementation.
pub struct MemoryStore {
    next_id: AtomicI64,
    tenants: DashMap<i64, Tenant>,
    tenants_by_key: DashMap<String, i64>,
    raw_events: DashMap<i64, RawEvent>,
    vehicles: DashMap<i64, Vehicle>,
    vehicles_by_device: DashMap<(i64, i64), i64>,
    routes: DashMap<i64, Route>,
    routes_by_name: DashMap<(i64, String), i64>,
    stops: DashMap<i64, Stop>,
    stops_by_geofence: DashMap<(i64, i64), i64>,
    arrivals: DashMap<i64, StopArrival>,
    stop_rules: DashMap<i64, StopRule>,
    stop_rules_by_stop: DashMap<(i64, i64), i64>,
    segment_rules: DashMap<i64, SegmentRule>,
    segment_rules_by_pair: DashMap<(i64, i64, i64), i64>,
    speed_zones: DashMap<i64, SpeedZone>,
    speed_zones_by_geofence: DashMap<(i64, i64), i64>,
    infractions: DashMap<i64, Infraction>,
    fines: DashMap<i64, Fine>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            tenants: DashMap::new(),
            tenants_by_key: DashMap::new(),
            raw_events: DashMap::new(),
            vehicles: DashMap::new(),
            vehicles_by_device: DashMap::new(),
            routes: DashMap::new(),
            routes_by_name: DashMap::new(),
            stops: DashMap::new(),
            stops_by_geofence: DashMap::new(),
            arrivals: DashMap::new(),
            stop_rules: DashMap::new(),
            stop_rules_by_stop: DashMap::new(),
            segment_rules: DashMap::new(),
            segment_rules_by_pair: DashMap::new(),
            speed_zones: DashMap::new(),
            speed_zones_by_geofence: DashMap::new(),
            infractions: DashMap::new(),
            fines: DashMap::new(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ─── Tenants ─────────────────────────────────────────────────

    async fn get_tenant_by_api_key(&self, api_key: &str) -> StoreResult<Option<Tenant>> {
        let Some(id) = self.tenants_by_key.get(api_key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.tenants.get(&id).map(|t| t.value().clone()))
    }

    async fn create_tenant(&self, name: &str, api_key: &str, active: bool) -> StoreResult<Tenant> {
        match self.tenants_by_key.entry(api_key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("tenant api key for {name}"))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let tenant = Tenant {
                    id,
                    name: name.to_string(),
                    api_key: api_key.to_string(),
                    active,
                };
                self.tenants.insert(id, tenant.clone());
                Ok(tenant)
            }
        }
    }

    // ─── Raw Events ──────────────────────────────────────────────

    async fn create_raw_event(
        &self,
        tenant_id: i64,
        device_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> StoreResult<RawEvent> {
        let id = self.alloc();
        let event = RawEvent {
            id,
            tenant_id,
            device_id: device_id.to_string(),
            event_type,
            payload,
            received_at: Utc::now(),
            processed_at: None,
        };
        self.raw_events.insert(id, event.clone());
        Ok(event)
    }

    async fn get_raw_event(&self, tenant_id: i64, event_id: i64) -> StoreResult<Option<RawEvent>> {
        Ok(self
            .raw_events
            .get(&event_id)
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.value().clone()))
    }

    async fn mark_event_processed(
        &self,
        tenant_id: i64,
        event_id: i64,
        processed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        match self.raw_events.get_mut(&event_id) {
            Some(mut event) if event.tenant_id == tenant_id => {
                event.processed_at = Some(processed_at);
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("raw event {event_id}"))),
        }
    }

    // ─── Vehicles ────────────────────────────────────────────────

    async fn get_vehicle_by_device(
        &self,
        tenant_id: i64,
        device_id: i64,
    ) -> StoreResult<Option<Vehicle>> {
        let Some(id) = self
            .vehicles_by_device
            .get(&(tenant_id, device_id))
            .map(|e| *e.value())
        else {
            return Ok(None);
        };
        Ok(self.vehicles.get(&id).map(|v| v.value().clone()))
    }

    async fn create_vehicle(
        &self,
        tenant_id: i64,
        device_id: i64,
        plate: &str,
    ) -> StoreResult<Vehicle> {
        match self.vehicles_by_device.entry((tenant_id, device_id)) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "vehicle for device {device_id} in tenant {tenant_id}"
            ))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let vehicle = Vehicle {
                    id,
                    tenant_id,
                    device_id,
                    plate: plate.to_string(),
                };
                self.vehicles.insert(id, vehicle.clone());
                Ok(vehicle)
            }
        }
    }

    async fn list_vehicles(&self, tenant_id: i64) -> StoreResult<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = self
            .vehicles
            .iter()
            .filter(|v| v.tenant_id == tenant_id)
            .map(|v| v.value().clone())
            .collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }

    // ─── Routes ──────────────────────────────────────────────────

    async fn get_route_by_name(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Route>> {
        let key = (tenant_id, name.to_string());
        let Some(id) = self.routes_by_name.get(&key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.routes.get(&id).map(|r| r.value().clone()))
    }

    async fn create_route(&self, tenant_id: i64, name: &str) -> StoreResult<Route> {
        match self.routes_by_name.entry((tenant_id, name.to_string())) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "route '{name}' in tenant {tenant_id}"
            ))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let route = Route {
                    id,
                    tenant_id,
                    name: name.to_string(),
                };
                self.routes.insert(id, route.clone());
                Ok(route)
            }
        }
    }

    // ─── Stops ───────────────────────────────────────────────────

    async fn get_stop_by_geofence(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<Stop>> {
        let Some(id) = self
            .stops_by_geofence
            .get(&(tenant_id, geofence_id))
            .map(|e| *e.value())
        else {
            return Ok(None);
        };
        Ok(self.stops.get(&id).map(|s| s.value().clone()))
    }

    async fn get_stop_by_name_ci(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Stop>> {
        let wanted = name.to_lowercase();
        Ok(self
            .stops
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .find(|s| s.name.to_lowercase() == wanted)
            .map(|s| s.value().clone()))
    }

    async fn create_stop(&self, stop: NewStop) -> StoreResult<Stop> {
        let id = self.alloc();
        if let Some(geofence_id) = stop.geofence_id {
            match self.stops_by_geofence.entry((stop.tenant_id, geofence_id)) {
                Entry::Occupied(_) => {
                    return Err(StoreError::Conflict(format!(
                        "stop for geofence {geofence_id} in tenant {}",
                        stop.tenant_id
                    )))
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        let stop = Stop {
            id,
            tenant_id: stop.tenant_id,
            route_id: stop.route_id,
            name: stop.name,
            geofence_id: stop.geofence_id,
            geometry: stop.geometry,
            anchor: stop.anchor,
            sort_order: stop.sort_order,
            geometry_note: stop.geometry_note,
        };
        self.stops.insert(id, stop.clone());
        Ok(stop)
    }

    async fn set_stop_geofence(
        &self,
        tenant_id: i64,
        stop_id: i64,
        geofence_id: i64,
    ) -> StoreResult<()> {
        {
            let stop = self
                .stops
                .get(&stop_id)
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
        }

        match self.stops_by_geofence.entry((tenant_id, geofence_id)) {
            Entry::Occupied(slot) if *slot.get() == stop_id => Ok(()),
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "geofence {geofence_id} already bound in tenant {tenant_id}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(stop_id);
                if let Some(mut stop) = self.stops.get_mut(&stop_id) {
                    stop.geofence_id = Some(geofence_id);
                }
                Ok(())
            }
        }
    }

    async fn count_route_stops(&self, tenant_id: i64, route_id: i64) -> StoreResult<u32> {
        Ok(self
            .stops
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.route_id == route_id)
            .count() as u32)
    }

    async fn list_stops(&self, tenant_id: i64) -> StoreResult<Vec<Stop>> {
        let mut stops: Vec<Stop> = self
            .stops
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.value().clone())
            .collect();
        stops.sort_by_key(|s| s.id);
        Ok(stops)
    }

    // ─── Stop Arrivals ───────────────────────────────────────────

    async fn create_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        arrived_at: DateTime<Utc>,
    ) -> StoreResult<StopArrival> {
        let id = self.alloc();
        let arrival = StopArrival {
            id,
            tenant_id,
            vehicle_id,
            stop_id,
            arrived_at,
            departed_at: None,
            dwell_minutes: None,
        };
        self.arrivals.insert(id, arrival.clone());
        Ok(arrival)
    }

    async fn get_open_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
    ) -> StoreResult<Option<StopArrival>> {
        Ok(self
            .arrivals
            .iter()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.vehicle_id == vehicle_id
                    && a.stop_id == stop_id
                    && a.is_open()
            })
            .max_by_key(|a| a.arrived_at)
            .map(|a| a.value().clone()))
    }

    async fn close_arrival(
        &self,
        tenant_id: i64,
        arrival_id: i64,
        departed_at: DateTime<Utc>,
        dwell_minutes: Option<i64>,
    ) -> StoreResult<StopArrival> {
        match self.arrivals.get_mut(&arrival_id) {
            Some(mut arrival) if arrival.tenant_id == tenant_id => {
                arrival.departed_at = Some(departed_at);
                arrival.dwell_minutes = dwell_minutes;
                Ok(arrival.value().clone())
            }
            _ => Err(StoreError::NotFound(format!("arrival {arrival_id}"))),
        }
    }

    async fn get_latest_closed_arrival_excluding(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        exclude_stop_id: i64,
    ) -> StoreResult<Option<StopArrival>> {
        Ok(self
            .arrivals
            .iter()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.vehicle_id == vehicle_id
                    && a.stop_id != exclude_stop_id
                    && a.departed_at.is_some()
                    && a.dwell_minutes.is_some()
            })
            .max_by_key(|a| a.departed_at)
            .map(|a| a.value().clone()))
    }

    async fn list_arrivals(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
    ) -> StoreResult<Vec<StopArrival>> {
        let mut arrivals: Vec<StopArrival> = self
            .arrivals
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.vehicle_id == vehicle_id)
            .map(|a| a.value().clone())
            .collect();
        arrivals.sort_by_key(|a| a.id);
        Ok(arrivals)
    }

    // ─── Rules ───────────────────────────────────────────────────

    async fn get_stop_rule(&self, tenant_id: i64, stop_id: i64) -> StoreResult<Option<StopRule>> {
        let Some(id) = self.stop_rules_by_stop.get(&(tenant_id, stop_id)).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.stop_rules.get(&id).filter(|r| r.active).map(|r| r.value().clone()))
    }

    async fn create_stop_rule(&self, rule: NewStopRule) -> StoreResult<StopRule> {
        match self.stop_rules_by_stop.entry((rule.tenant_id, rule.stop_id)) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "dwell rule for stop {}",
                rule.stop_id
            ))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let rule = StopRule {
                    id,
                    tenant_id: rule.tenant_id,
                    stop_id: rule.stop_id,
                    min_dwell_minutes: rule.min_dwell_minutes,
                    max_dwell_minutes: rule.max_dwell_minutes,
                    fine_amount_usd: rule.fine_amount_usd,
                    penalty_per_minute_usd: rule.penalty_per_minute_usd,
                    active: rule.active,
                };
                self.stop_rules.insert(id, rule.clone());
                Ok(rule)
            }
        }
    }

    async fn get_segment_rule(
        &self,
        tenant_id: i64,
        from_stop_id: i64,
        to_stop_id: i64,
    ) -> StoreResult<Option<SegmentRule>> {
        let key = (tenant_id, from_stop_id, to_stop_id);
        let Some(id) = self.segment_rules_by_pair.get(&key).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .segment_rules
            .get(&id)
            .filter(|r| r.active)
            .map(|r| r.value().clone()))
    }

    async fn create_segment_rule(&self, rule: NewSegmentRule) -> StoreResult<SegmentRule> {
        let key = (rule.tenant_id, rule.from_stop_id, rule.to_stop_id);
        match self.segment_rules_by_pair.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "segment rule {} -> {}",
                rule.from_stop_id, rule.to_stop_id
            ))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let rule = SegmentRule {
                    id,
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
                self.segment_rules.insert(id, rule.clone());
                Ok(rule)
            }
        }
    }

    async fn get_speed_zone(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<SpeedZone>> {
        let Some(id) = self
            .speed_zones_by_geofence
            .get(&(tenant_id, geofence_id))
            .map(|e| *e.value())
        else {
            return Ok(None);
        };
        Ok(self
            .speed_zones
            .get(&id)
            .filter(|z| z.active)
            .map(|z| z.value().clone()))
    }

    async fn create_speed_zone(&self, zone: NewSpeedZone) -> StoreResult<SpeedZone> {
        match self
            .speed_zones_by_geofence
            .entry((zone.tenant_id, zone.geofence_id))
        {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "speed zone for geofence {}",
                zone.geofence_id
            ))),
            Entry::Vacant(slot) => {
                let id = self.alloc();
                slot.insert(id);
                let zone = SpeedZone {
                    id,
                    tenant_id: zone.tenant_id,
                    geofence_id: zone.geofence_id,
                    stop_id: zone.stop_id,
                    route_id: zone.route_id,
                    max_speed_kmh: zone.max_speed_kmh,
                    fine_amount_usd: zone.fine_amount_usd,
                    penalty_per_kmh_usd: zone.penalty_per_kmh_usd,
                    active: zone.active,
                };
                self.speed_zones.insert(id, zone.clone());
                Ok(zone)
            }
        }
    }

    // ─── Infractions & Fines ─────────────────────────────────────

    async fn create_infraction_with_fine(
        &self,
        infraction: NewInfraction,
        amount_usd: Decimal,
    ) -> StoreResult<(Infraction, Fine)> {
        let infraction_id = self.alloc();
        let fine_id = self.alloc();
        let infraction = Infraction {
            id: infraction_id,
            tenant_id: infraction.tenant_id,
            vehicle_id: infraction.vehicle_id,
            kind: infraction.kind,
            detected_at: infraction.detected_at,
            detail: infraction.detail,
            status: InfractionStatus::Pending,
        };
        let fine = Fine {
            id: fine_id,
            tenant_id: infraction.tenant_id,
            infraction_id,
            amount_usd,
        };
        self.infractions.insert(infraction_id, infraction.clone());
        self.fines.insert(fine_id, fine.clone());
        Ok((infraction, fine))
    }

    async fn list_infractions(&self, tenant_id: i64) -> StoreResult<Vec<Infraction>> {
        let mut infractions: Vec<Infraction> = self
            .infractions
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .map(|i| i.value().clone())
            .collect();
        infractions.sort_by_key(|i| i.id);
        Ok(infractions)
    }

    async fn list_fines(&self, tenant_id: i64) -> StoreResult<Vec<Fine>> {
        let mut fines: Vec<Fine> = self
            .fines
            .iter()
            .filter(|f| f.tenant_id == tenant_id)
            .map(|f| f.value().clone())
            .collect();
        fines.sort_by_key(|f| f.id);
        Ok(fines)
    }
}
