// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Raw tracking event model and vendor event-type mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event categories emitted by the tracking platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Position,
    GeofenceEnter,
    GeofenceExit,
    OverspeedAlarm,
    Ignition,
    Other,
}

impl EventType {
    /// Map a vendor `type` string. Unknown strings are kept (as `Other`)
    /// rather than rejected; the raw payload still gets archived.
    pub fn from_vendor(raw: &str) -> Self {
        match raw {
            "position" => EventType::Position,
            "geofenceEnter" => EventType::GeofenceEnter,
            "geofenceExit" => EventType::GeofenceExit,
            "deviceOverspeed" => EventType::OverspeedAlarm,
            "ignitionOn" | "ignitionOff" => EventType::Ignition,
            _ => EventType::Other,
        }
    }
}

/// Immutable audit record of an inbound webhook event.
///
/// Written synchronously before the HTTP 202 goes out; the only later
/// mutation is the `processed_at` stamp. Detection never reads it back;
/// it exists for audit and manual replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Device identifier exactly as received, before any coercion
    pub device_id: String,
    /// Mapped event category
    pub event_type: EventType,
    /// Full vendor payload, untouched
    pub payload: serde_json::Value,
    /// When the webhook was received
    pub received_at: DateTime<Utc>,
    /// Set once the detection pipeline completed for this event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}
