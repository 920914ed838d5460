// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rule evaluation: dwell-time, segment-time, and overspeed checks.
//!
//! All three follow one pattern: fetch the single active rule for the
//! context key; none means no-op; a violation computes the dynamic penalty
//! `base + excess × per-unit rate` and persists one Infraction plus its
//! Fine in a single atomic write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::models::{Fine, Infraction, InfractionKind};
use crate::services::arrivals::SegmentAnchor;
use crate::services::stops::{extract_geofence_ref, numeric};
use crate::store::{NewInfraction, Store, StoreResult};
use crate::time_utils::{knots_to_kmh, minutes_between};

/// The speed reported by an event. The vendor unit is knots; a payload
/// with no readable speed yields 0, with the default flagged rather than
/// silently substituted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReading {
    pub knots: f64,
    pub defaulted: bool,
}

/// Read the event speed from `position.speed`, falling back to the
/// top-level `speed` field.
pub fn extract_speed(payload: &Value) -> SpeedReading {
    let raw = payload
        .pointer("/position/speed")
        .or_else(|| payload.get("speed"));
    match raw.and_then(numeric) {
        Some(knots) => SpeedReading {
            knots,
            defaulted: false,
        },
        None => SpeedReading {
            knots: 0.0,
            defaulted: true,
        },
    }
}

/// Evaluates resolved event context against the tenant's active rules.
pub struct RuleEvaluator {
    store: Arc<dyn Store>,
}

impl RuleEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Dwell-time check for a closed arrival. Over the maximum is an
    /// "exceeded" violation; under a configured minimum is "early". The
    /// two are mutually exclusive per call.
    pub async fn check_dwell(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        dwell_minutes: i64,
        detected_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Infraction, Fine)>> {
        let Some(rule) = self.store.get_stop_rule(tenant_id, stop_id).await? else {
            return Ok(None);
        };

        let violation = if dwell_minutes > rule.max_dwell_minutes {
            Some(("exceeded", rule.max_dwell_minutes, dwell_minutes - rule.max_dwell_minutes))
        } else {
            match rule.min_dwell_minutes {
                Some(min) if dwell_minutes < min => Some(("early", min, min - dwell_minutes)),
                _ => None,
            }
        };
        let Some((case, threshold, excess)) = violation else {
            return Ok(None);
        };

        let amount = rule.fine_amount_usd + Decimal::from(excess) * rule.penalty_per_minute_usd;
        let detail = json!({
            "rule_id": rule.id,
            "stop_id": stop_id,
            "case": case,
            "dwell_minutes": dwell_minutes,
            "threshold_minutes": threshold,
            "excess_minutes": excess,
        });
        let created = self
            .record(
                tenant_id,
                vehicle_id,
                InfractionKind::DwellTime,
                detected_at,
                detail,
                amount,
            )
            .await?;
        tracing::info!(
            tenant_id,
            vehicle_id,
            stop_id,
            infraction_id = created.0.id,
            case,
            dwell_minutes,
            amount = %amount,
            "Dwell-time infraction"
        );
        Ok(Some(created))
    }

    /// Segment-time check for an arrival, anchored at the vehicle's last
    /// departure. Late (over the expected maximum) is checked first, then
    /// early against a configured minimum.
    pub async fn check_segment(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        anchor: &SegmentAnchor,
        to_stop_id: i64,
        arrived_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Infraction, Fine)>> {
        let Some(rule) = self
            .store
            .get_segment_rule(tenant_id, anchor.from_stop_id, to_stop_id)
            .await?
        else {
            return Ok(None);
        };

        let travel_minutes = minutes_between(anchor.departed_at, arrived_at);
        let violation = if travel_minutes > rule.expected_max_minutes {
            Some(("late", rule.expected_max_minutes, travel_minutes - rule.expected_max_minutes))
        } else {
            match rule.expected_min_minutes {
                Some(min) if travel_minutes < min => Some(("early", min, min - travel_minutes)),
                _ => None,
            }
        };
        let Some((case, threshold, excess)) = violation else {
            return Ok(None);
        };

        let amount = rule.fine_amount_usd + Decimal::from(excess) * rule.penalty_per_minute_usd;
        let detail = json!({
            "rule_id": rule.id,
            "route_id": rule.route_id,
            "from_stop_id": anchor.from_stop_id,
            "to_stop_id": to_stop_id,
            "case": case,
            "travel_minutes": travel_minutes,
            "threshold_minutes": threshold,
            "excess_minutes": excess,
        });
        let created = self
            .record(
                tenant_id,
                vehicle_id,
                InfractionKind::TimeSegment,
                arrived_at,
                detail,
                amount,
            )
            .await?;
        tracing::info!(
            tenant_id,
            vehicle_id,
            from_stop_id = anchor.from_stop_id,
            to_stop_id,
            infraction_id = created.0.id,
            case,
            travel_minutes,
            amount = %amount,
            "Segment-time infraction"
        );
        Ok(Some(created))
    }

    /// Overspeed check against the speed zone for the event's geofence.
    /// Events with no geofence context or no matching active zone are
    /// no-ops.
    pub async fn check_overspeed(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        payload: &Value,
        detected_at: DateTime<Utc>,
    ) -> StoreResult<Option<(Infraction, Fine)>> {
        let Some(gref) = extract_geofence_ref(payload) else {
            return Ok(None);
        };
        let Some(zone) = self
            .store
            .get_speed_zone(tenant_id, gref.geofence_id)
            .await?
        else {
            return Ok(None);
        };

        let reading = extract_speed(payload);
        if reading.defaulted {
            tracing::debug!(
                tenant_id,
                vehicle_id,
                geofence_id = gref.geofence_id,
                "No readable speed in payload, defaulting to 0"
            );
        }
        let speed_kmh = knots_to_kmh(reading.knots);
        if speed_kmh <= zone.max_speed_kmh {
            return Ok(None);
        }

        let excess = speed_kmh - zone.max_speed_kmh;
        let amount = zone.fine_amount_usd + Decimal::from(excess) * zone.penalty_per_kmh_usd;
        let detail = json!({
            "zone_id": zone.id,
            "geofence_id": zone.geofence_id,
            "speed_kmh": speed_kmh,
            "speed_knots": reading.knots,
            "speed_defaulted": reading.defaulted,
            "max_speed_kmh": zone.max_speed_kmh,
            "excess_kmh": excess,
        });
        let created = self
            .record(
                tenant_id,
                vehicle_id,
                InfractionKind::Overspeed,
                detected_at,
                detail,
                amount,
            )
            .await?;
        tracing::info!(
            tenant_id,
            vehicle_id,
            geofence_id = zone.geofence_id,
            infraction_id = created.0.id,
            speed_kmh,
            max_speed_kmh = zone.max_speed_kmh,
            amount = %amount,
            "Overspeed infraction"
        );
        Ok(Some(created))
    }

    async fn record(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        kind: InfractionKind,
        detected_at: DateTime<Utc>,
        detail: Value,
        amount_usd: Decimal,
    ) -> StoreResult<(Infraction, Fine)> {
        self.store
            .create_infraction_with_fine(
                NewInfraction {
                    tenant_id,
                    vehicle_id,
                    kind,
                    detected_at,
                    detail,
                },
                amount_usd,
            )
            .await
    }
}
