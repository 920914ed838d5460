// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod arrival;
pub mod event;
pub mod infraction;
pub mod rule;
pub mod stop;
pub mod tenant;
pub mod vehicle;

pub use arrival::StopArrival;
pub use event::{EventType, RawEvent};
pub use infraction::{Fine, Infraction, InfractionKind, InfractionStatus};
pub use rule::{SegmentRule, SpeedZone, StopRule};
pub use stop::{GeoPoint, Route, Stop, StopGeometry};
pub use tenant::Tenant;
pub use vehicle::Vehicle;
