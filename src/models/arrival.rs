// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Stop arrival (presence interval) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One vehicle's presence at one stop.
///
/// Opened by a geofence enter, closed by the matching exit. At most one
/// open arrival may exist per (vehicle, stop) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopArrival {
    /// Arrival ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Vehicle that arrived
    pub vehicle_id: i64,
    /// Stop it arrived at
    pub stop_id: i64,
    /// When the vehicle entered the geofence
    pub arrived_at: DateTime<Utc>,
    /// When it left; `None` while the arrival is open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departed_at: Option<DateTime<Utc>>,
    /// Rounded dwell duration; stays `None` on a superseded arrival
    /// (closed administratively because a second enter arrived first)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_minutes: Option<i64>,
}

impl StopArrival {
    /// An arrival with no departure recorded yet.
    pub fn is_open(&self) -> bool {
        self.departed_at.is_none()
    }
}
