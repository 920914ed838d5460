// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time handling and unit conversion.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse the vendor's `serverTime` field (RFC3339 with offset).
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole minutes between two instants, rounded to nearest.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let secs = (to - from).num_seconds() as f64;
    (secs / 60.0).round() as i64
}

/// Convert a speed in knots (vendor unit) to whole km/h, rounded to nearest.
pub fn knots_to_kmh(knots: f64) -> i64 {
    (knots * 1.852).round() as i64
}
