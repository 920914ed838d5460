// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Arrival tracking: pairing geofence enters with exits.
//!
//! Per (vehicle, stop) pair an arrival moves NoArrival → Open → Closed. An
//! exit closes the most recent open arrival and yields its dwell time; an
//! exit with no open counterpart changes nothing. A second enter while one
//! is still open supersedes the stale record: it is closed at the new enter
//! time with no dwell, so a lost exit event can never turn into a fine or
//! anchor a segment measurement.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::StopArrival;
use crate::store::{Store, StoreResult};
use crate::time_utils::minutes_between;

/// Where the vehicle last departed from, anchoring a segment-time check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentAnchor {
    pub from_stop_id: i64,
    pub departed_at: DateTime<Utc>,
}

/// Outcome of recording a geofence enter.
#[derive(Debug, Clone)]
pub struct EnterRecord {
    /// The freshly opened arrival.
    pub arrival: StopArrival,
    /// A stale open arrival for the same pair, closed without dwell.
    pub superseded: Option<StopArrival>,
}

/// Maintains per-(vehicle, stop) presence state.
pub struct ArrivalTracker {
    store: Arc<dyn Store>,
}

impl ArrivalTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a geofence enter, superseding any stale open arrival for the
    /// same pair first.
    pub async fn record_enter(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        arrived_at: DateTime<Utc>,
    ) -> StoreResult<EnterRecord> {
        let superseded = match self
            .store
            .get_open_arrival(tenant_id, vehicle_id, stop_id)
            .await?
        {
            Some(stale) => {
                tracing::warn!(
                    tenant_id,
                    vehicle_id,
                    stop_id,
                    arrival_id = stale.id,
                    "Enter with an open arrival pending; superseding (exit never seen)"
                );
                Some(
                    self.store
                        .close_arrival(tenant_id, stale.id, arrived_at, None)
                        .await?,
                )
            }
            None => None,
        };

        let arrival = self
            .store
            .create_arrival(tenant_id, vehicle_id, stop_id, arrived_at)
            .await?;
        tracing::debug!(
            tenant_id,
            vehicle_id,
            stop_id,
            arrival_id = arrival.id,
            "Opened arrival"
        );

        Ok(EnterRecord {
            arrival,
            superseded,
        })
    }

    /// Record a geofence exit: close the most recent open arrival for the
    /// pair and return it with its dwell time. `None` when no open arrival
    /// exists; an exit with no matching enter yields no duration.
    pub async fn record_exit(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        stop_id: i64,
        departed_at: DateTime<Utc>,
    ) -> StoreResult<Option<StopArrival>> {
        let Some(open) = self
            .store
            .get_open_arrival(tenant_id, vehicle_id, stop_id)
            .await?
        else {
            tracing::debug!(
                tenant_id,
                vehicle_id,
                stop_id,
                "Exit with no open arrival, ignoring"
            );
            return Ok(None);
        };

        let dwell_minutes = minutes_between(open.arrived_at, departed_at);
        let closed = self
            .store
            .close_arrival(tenant_id, open.id, departed_at, Some(dwell_minutes))
            .await?;
        tracing::debug!(
            tenant_id,
            vehicle_id,
            stop_id,
            arrival_id = closed.id,
            dwell_minutes,
            "Closed arrival"
        );
        Ok(Some(closed))
    }

    /// The vehicle's most recent departure from any stop other than the one
    /// being entered. Only properly closed arrivals qualify; superseded
    /// records carry no dwell and never anchor.
    pub async fn segment_anchor(
        &self,
        tenant_id: i64,
        vehicle_id: i64,
        arriving_stop_id: i64,
    ) -> StoreResult<Option<SegmentAnchor>> {
        let anchor = self
            .store
            .get_latest_closed_arrival_excluding(tenant_id, vehicle_id, arriving_stop_id)
            .await?
            .and_then(|a| {
                a.departed_at.map(|departed_at| SegmentAnchor {
                    from_stop_id: a.stop_id,
                    departed_at,
                })
            });
        Ok(anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn tracker() -> (Arc<dyn Store>, ArrivalTracker) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let tracker = ArrivalTracker::new(Arc::clone(&store));
        (store, tracker)
    }

    #[tokio::test]
    async fn test_enter_then_exit_records_dwell() {
        let (_store, tracker) = tracker();
        let t0 = Utc::now();

        let entered = tracker.record_enter(1, 5, 9, t0).await.unwrap();
        assert!(entered.superseded.is_none());
        assert!(entered.arrival.is_open());

        let closed = tracker
            .record_exit(1, 5, 9, t0 + Duration::minutes(8))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.id, entered.arrival.id);
        assert_eq!(closed.dwell_minutes, Some(8));
    }

    #[tokio::test]
    async fn test_exit_without_enter_is_noop() {
        let (store, tracker) = tracker();

        let closed = tracker.record_exit(1, 5, 9, Utc::now()).await.unwrap();
        assert!(closed.is_none());
        assert!(store.list_arrivals(1, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exit_only_matches_same_stop() {
        let (_store, tracker) = tracker();
        let t0 = Utc::now();

        tracker.record_enter(1, 5, 9, t0).await.unwrap();

        // Exit at a different stop does not close the open arrival at 9.
        let closed = tracker
            .record_exit(1, 5, 10, t0 + Duration::minutes(3))
            .await
            .unwrap();
        assert!(closed.is_none());

        let closed = tracker
            .record_exit(1, 5, 9, t0 + Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.dwell_minutes, Some(5));
    }

    #[tokio::test]
    async fn test_double_enter_supersedes_stale_open() {
        let (store, tracker) = tracker();
        let t0 = Utc::now();

        let first = tracker.record_enter(1, 5, 9, t0).await.unwrap();
        let second = tracker
            .record_enter(1, 5, 9, t0 + Duration::minutes(4))
            .await
            .unwrap();

        // The first arrival is closed at the second enter time, no dwell.
        let superseded = second.superseded.unwrap();
        assert_eq!(superseded.id, first.arrival.id);
        assert_eq!(superseded.departed_at, Some(t0 + Duration::minutes(4)));
        assert_eq!(superseded.dwell_minutes, None);

        // Only one open arrival remains, the fresh one.
        let arrivals = store.list_arrivals(1, 5).await.unwrap();
        let open: Vec<_> = arrivals.iter().filter(|a| a.is_open()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.arrival.id);

        // The later exit pairs with the fresh arrival.
        let closed = tracker
            .record_exit(1, 5, 9, t0 + Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.id, second.arrival.id);
        assert_eq!(closed.dwell_minutes, Some(6));
    }

    #[tokio::test]
    async fn test_segment_anchor_is_latest_departure_elsewhere() {
        let (_store, tracker) = tracker();
        let t0 = Utc::now();

        // Closed visit at stop 1, then at stop 2.
        tracker.record_enter(1, 5, 1, t0).await.unwrap();
        tracker
            .record_exit(1, 5, 1, t0 + Duration::minutes(2))
            .await
            .unwrap();
        tracker
            .record_enter(1, 5, 2, t0 + Duration::minutes(10))
            .await
            .unwrap();
        tracker
            .record_exit(1, 5, 2, t0 + Duration::minutes(13))
            .await
            .unwrap();

        // Arriving at stop 3: anchored to the departure from stop 2.
        let anchor = tracker.segment_anchor(1, 5, 3).await.unwrap().unwrap();
        assert_eq!(anchor.from_stop_id, 2);
        assert_eq!(anchor.departed_at, t0 + Duration::minutes(13));

        // Re-entering stop 2 itself: its own visits are excluded.
        let anchor = tracker.segment_anchor(1, 5, 2).await.unwrap().unwrap();
        assert_eq!(anchor.from_stop_id, 1);
    }

    #[tokio::test]
    async fn test_segment_anchor_ignores_superseded_visits() {
        let (_store, tracker) = tracker();
        let t0 = Utc::now();

        // A visit to stop 1 whose exit was lost, superseded by re-entry.
        tracker.record_enter(1, 5, 1, t0).await.unwrap();
        tracker
            .record_enter(1, 5, 1, t0 + Duration::minutes(4))
            .await
            .unwrap();

        // No properly closed visit anywhere yet.
        assert!(tracker.segment_anchor(1, 5, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_anchor_for_first_ever_arrival() {
        let (_store, tracker) = tracker();
        assert!(tracker.segment_anchor(1, 5, 9).await.unwrap().is_none());
    }
}
