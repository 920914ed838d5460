//! Storage layer: one trait, two backends.
//!
//! Everything the detection engine persists goes through [`Store`], consumed
//! as `Arc<dyn Store>`. [`MemoryStore`] backs tests and local development;
//! [`FirestoreStore`] is the production backend.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::stop::{GeoPoint, StopGeometry};
use crate::models::{
    EventType, Fine, Infraction, InfractionKind, RawEvent, Route, SegmentRule, SpeedZone, Stop,
    StopArrival, StopRule, Tenant, Vehicle,
};

/// Collection names as constants.
pub mod collections {
    pub const TENANTS: &str = "tenants";
    pub const RAW_EVENTS: &str = "raw_events";
    pub const VEHICLES: &str = "vehicles";
    pub const ROUTES: &str = "routes";
    pub const STOPS: &str = "stops";
    /// Registry enforcing one stop per (tenant, geofence id)
    pub const STOP_GEOFENCES: &str = "stop_geofences";
    pub const ARRIVALS: &str = "stop_arrivals";
    pub const STOP_RULES: &str = "stop_rules";
    pub const SEGMENT_RULES: &str = "segment_rules";
    pub const SPEED_ZONES: &str = "speed_zones";
    pub const INFRACTIONS: &str = "infractions";
    pub const FINES: &str = "fines";
}

/// Storage errors. `Conflict` is how uniqueness races surface; callers that
/// auto-create recover from it by re-reading.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate record: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Parameters for creating a stop.
#[derive(Debug, Clone)]
pub struct NewStop {
    pub tenant_id: i64,
    pub route_id: i64,
    pub name: String,
    pub geofence_id: Option<i64>,
    pub geometry: StopGeometry,
    pub anchor: GeoPoint,
    pub sort_order: u32,
    pub geometry_note: Option<String>,
}

/// Parameters for creating a stop dwell rule.
#[derive(Debug, Clone)]
pub struct NewStopRule {
    pub tenant_id: i64,
    pub stop_id: i64,
    pub min_dwell_minutes: Option<i64>,
    pub max_dwell_minutes: i64,
    pub fine_amount_usd: Decimal,
    pub penalty_per_minute_usd: Decimal,
    pub active: bool,
}

/// Parameters for creating a segment transit-time rule.
#[derive(Debug, Clone)]
pub struct NewSegmentRule {
    pub tenant_id: i64,
    pub route_id: i64,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub expected_min_minutes: Option<i64>,
    pub expected_max_minutes: i64,
    pub fine_amount_usd: Decimal,
    pub penalty_per_minute_usd: Decimal,
    pub active: bool,
}

/// Parameters for creating a speed zone.
#[derive(Debug, Clone)]
pub struct NewSpeedZone {
    pub tenant_id: i64,
    pub geofence_id: i64,
    pub stop_id: Option<i64>,
    pub route_id: Option<i64>,
    pub max_speed_kmh: i64,
    pub fine_amount_usd: Decimal,
    pub penalty_per_kmh_usd: Decimal,
    pub active: bool,
}

/// Parameters for creating an infraction. Status always starts `Pending`.
#[derive(Debug, Clone)]
pub struct NewInfraction {
    pub tenant_id: i64,
    pub vehicle_id: i64,
    pub kind: InfractionKind,
    pub detected_at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

/// The persistence seam.
///
/// Uniqueness constraints (vehicle device id, route name, stop geofence id,
/// tenant api key, all scoped per tenant) are enforced at create time; a
/// violated constraint returns [`StoreError::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Tenants ─────────────────────────────────────────────────

    async fn get_tenant_by_api_key(&self, api_key: &str) -> StoreResult<Option<Tenant>>;

    async fn create_tenant(&self, name: &str, api_key: &str, active: bool) -> StoreResult<Tenant>;

    // ─── Raw Events ──────────────────────────────────────────────

    async fn create_raw_event(
        &self,
        tenant_id: i64,
        device_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> StoreResult<RawEvent>;

    async fn get_raw_event(&self, tenant_id: i64, event_id: i64) -> StoreResult<Option<RawEvent>>;

    /// Stamp the event as fully processed by the detection pipeline.
    async fn mark_event_processed(
        &self,
        tenant_id: i64,
        event_id: i64,
        processed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ─── Vehicles ────────────────────────────────────────────────

    async fn get_vehicle_by_device(
        &self,
        tenant_id: i64,
        device_id: i64,
    ) -> StoreResult<Option<Vehicle>>;

    async fn create_vehicle(
        &self,
        tenant_id: i64,
        device_id: i64,
        plate: &str,
    ) -> StoreResult<Vehicle>;

    async fn list_vehicles(&self, tenant_id: i64) -> StoreResult<Vec<Vehicle>>;

    // ─── Routes ──────────────────────────────────────────────────

    async fn get_route_by_name(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Route>>;

    async fn create_route(&self, tenant_id: i64, name: &str) -> StoreResult<Route>;

    // ─── Stops ───────────────────────────────────────────────────

    async fn get_stop_by_geofence(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<Stop>>;

    /// Case-insensitive stop name lookup within a tenant.
    async fn get_stop_by_name_ci(&self, tenant_id: i64, name: &str) -> StoreResult<Option<Stop>>;

    async fn create_stop(&self, stop: NewStop) -> StoreResult<Stop>;

    /// Backfill a stop's geofence id. Fails with `Conflict` when the id is
    /// already registered to another stop; a stop whose geofence id is
    /// already set is left untouched.
    async fn set_stop_geofence(
        &self,
        tenant_id: i64,
        stop_id: i64,
        geofence_id: i64,
    ) -> StoreResult<()>;

    async fn count_route_stops(&self, tenant_id: i64, route_id: i64) -> StoreResult<u32>;

    async fn list_stops(&self, tenant_id: i64) -> StoreResult<Vec<Stop>>;

    // ─── Stop Arrivals ───────────────────────────────────────────

    async fn create_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        arrived_at: DateTime<Utc>,
    ) -> StoreResult<StopArrival>;

    /// Most recent open arrival for the (vehicle, stop) pair.
    async fn get_open_arrival(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
    ) -> StoreResult<Option<StopArrival>>;

    /// Close an arrival. `dwell_minutes` stays `None` when the close is a
    /// supersede rather than an observed departure.
    async fn close_arrival(
        &self,
        tenant_id: i64,
        arrival_id: i64,
        departed_at: DateTime<Utc>,
        dwell_minutes: Option<i64>,
    ) -> StoreResult<StopArrival>;

    /// The vehicle's most recent properly-closed arrival (departure and
    /// dwell both recorded) at any stop other than `exclude_stop_id`.
    /// This is the segment-time anchor.
    async fn get_latest_closed_arrival_excluding(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        exclude_stop_id: i64,
    ) -> StoreResult<Option<StopArrival>>;

    async fn list_arrivals(&self, tenant_id: i64, vehicle_id: i64)
        -> StoreResult<Vec<StopArrival>>;

    // ─── Rules ───────────────────────────────────────────────────

    /// The active dwell rule for a stop, if any.
    async fn get_stop_rule(&self, tenant_id: i64, stop_id: i64) -> StoreResult<Option<StopRule>>;

    async fn create_stop_rule(&self, rule: NewStopRule) -> StoreResult<StopRule>;

    /// The active transit-time rule for a (from, to) stop pair, if any.
    async fn get_segment_rule(
        &self,
        tenant_id: i64,
        from_stop_id: i64,
        to_stop_id: i64,
    ) -> StoreResult<Option<SegmentRule>>;

    async fn create_segment_rule(&self, rule: NewSegmentRule) -> StoreResult<SegmentRule>;

    /// The active speed zone for a vendor geofence, if any.
    async fn get_speed_zone(
        &self,
        tenant_id: i64,
        geofence_id: i64,
    ) -> StoreResult<Option<SpeedZone>>;

    async fn create_speed_zone(&self, zone: NewSpeedZone) -> StoreResult<SpeedZone>;

    // ─── Infractions & Fines ─────────────────────────────────────

    /// Create an infraction and its fine as one atomic write.
    async fn create_infraction_with_fine(
        &self,
        infraction: NewInfraction,
        amount_usd: Decimal,
    ) -> StoreResult<(Infraction, Fine)>;

    async fn list_infractions(&self, tenant_id: i64) -> StoreResult<Vec<Infraction>>;

    async fn list_fines(&self, tenant_id: i64) -> StoreResult<Vec<Fine>>;
}
