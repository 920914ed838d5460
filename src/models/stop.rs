// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Route and stop models with geofence geometry.

use serde::{Deserialize, Serialize};

/// A point in WGS84 coordinates, stored latitude-first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Stop geofence geometry.
///
/// A stop is exactly one of these; the variants are a tagged union in
/// storage (`kind` discriminator), never a pair of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopGeometry {
    Circle { center: GeoPoint, radius_m: f64 },
    Polygon { vertices: Vec<GeoPoint> },
}

/// An ordered collection of stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Route ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Route name, unique within the tenant
    pub name: String,
}

/// Name of the catch-all route that auto-imported stops land under.
pub const IMPORTED_ROUTE_NAME: &str = "imported";

/// A stop on a route, backed by a vendor geofence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    /// Stop ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Route this stop belongs to
    pub route_id: i64,
    /// Display name (vendor geofence name for imported stops)
    pub name: String,
    /// Vendor geofence id; unique within the tenant when set, and
    /// immutable once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geofence_id: Option<i64>,
    /// Geofence geometry
    pub geometry: StopGeometry,
    /// Representative point for display
    pub anchor: GeoPoint,
    /// Position within the route (insertion order)
    pub sort_order: u32,
    /// Present when the stored geometry came from a parse fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_note: Option<String>,
}
