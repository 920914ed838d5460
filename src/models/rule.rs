// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Billable rule models: segment transit time, stop dwell time, speed zones.
//!
//! All money amounts are USD decimals; per-unit penalties scale with how far
//! past the threshold the measurement landed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Expected transit time between two consecutive stops on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRule {
    /// Rule ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Route the segment belongs to
    pub route_id: i64,
    /// Stop the vehicle departed from
    pub from_stop_id: i64,
    /// Stop the vehicle arrived at
    pub to_stop_id: i64,
    /// Arriving sooner than this is an "early" violation (when set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_min_minutes: Option<i64>,
    /// Arriving later than this is a "late" violation
    pub expected_max_minutes: i64,
    /// Base fine
    pub fine_amount_usd: Decimal,
    /// Added per minute outside the window
    pub penalty_per_minute_usd: Decimal,
    /// Inactive rules are never evaluated
    pub active: bool,
}

/// Allowed dwell window at a single stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRule {
    /// Rule ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Stop the rule applies to
    pub stop_id: i64,
    /// Leaving before this is an "early" violation (when set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_dwell_minutes: Option<i64>,
    /// Staying past this is an "exceeded" violation
    pub max_dwell_minutes: i64,
    /// Base fine
    pub fine_amount_usd: Decimal,
    /// Added per minute outside the window
    pub penalty_per_minute_usd: Decimal,
    /// Inactive rules are never evaluated
    pub active: bool,
}

/// Speed limit attached to a vendor geofence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedZone {
    /// Zone ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Vendor geofence the limit applies within
    pub geofence_id: i64,
    /// Associated stop, for display only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<i64>,
    /// Associated route, for display only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<i64>,
    /// Speed limit in km/h
    pub max_speed_kmh: i64,
    /// Base fine
    pub fine_amount_usd: Decimal,
    /// Added per km/h over the limit
    pub penalty_per_kmh_usd: Decimal,
    /// Inactive zones are never evaluated
    pub active: bool,
}
