// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Infraction and fine models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which rule class produced an infraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfractionKind {
    Overspeed,
    DwellTime,
    TimeSegment,
}

/// Review lifecycle of an infraction. Created `Pending`; transitions are
/// performed by the back-office, never by the detection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfractionStatus {
    Pending,
    Confirmed,
    Dismissed,
    Billed,
}

/// A detected rule violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Infraction {
    /// Infraction ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Vehicle that violated the rule
    pub vehicle_id: i64,
    /// Rule class
    pub kind: InfractionKind,
    /// When the violating event occurred
    pub detected_at: DateTime<Utc>,
    /// Measured value, threshold, excess, rule id, sub-case tag
    pub detail: serde_json::Value,
    /// Review status
    pub status: InfractionStatus,
}

/// The monetary consequence of an infraction, created atomically with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    /// Fine ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// The infraction this fine bills (1:1)
    pub infraction_id: i64,
    /// Amount in USD
    pub amount_usd: Decimal,
}
