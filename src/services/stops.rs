// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stop resolution: vendor geofence → known stop.
//!
//! Lookup runs in three steps: exact geofence id, then case-insensitive
//! name (healing the missing id binding), then auto-import under the shared
//! "imported" route. A pre-existing geofence binding is never overwritten,
//! and every create recovers from losing a concurrent race by re-reading.

use std::sync::Arc;

use serde_json::Value;

use crate::models::stop::{GeoPoint, IMPORTED_ROUTE_NAME};
use crate::models::{Route, Stop};
use crate::store::{NewStop, Store, StoreError, StoreResult};
use crate::wkt;

/// Geofence identity extracted from a vendor payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRef {
    pub geofence_id: i64,
    pub name: Option<String>,
    /// WKT area string, when the payload carried one.
    pub area: Option<String>,
}

/// Pull the geofence identity out of a vendor payload.
///
/// The vendor moves the id around depending on event type and forwarding
/// config; try each known location in order: the payload root, the nested
/// `event.attributes` object, then the `additional` object. The `geofence`
/// object, when present, describes the same geofence regardless of which
/// location carried the id, so its name/area always apply.
///
/// `None` means "no stop context for this event", never an error.
pub fn extract_geofence_ref(payload: &Value) -> Option<GeofenceRef> {
    let geofence = payload.get("geofence");
    let name_of = |source: &Value| {
        nonempty_str(source, "geofenceName")
            .or_else(|| geofence.and_then(|g| nonempty_str(g, "name")))
    };
    let area = geofence
        .and_then(|g| nonempty_str(g, "area"))
        .or_else(|| nonempty_str(payload, "area"));

    let sources = [
        Some(payload),
        payload.pointer("/event/attributes"),
        payload.get("additional"),
    ];
    for source in sources.into_iter().flatten() {
        if let Some(geofence_id) = int_field(source, "geofenceId") {
            return Some(GeofenceRef {
                geofence_id,
                name: name_of(source),
                area: area.clone(),
            });
        }
    }

    // A bare `geofence` object still identifies the stop.
    let geofence = geofence?;
    Some(GeofenceRef {
        geofence_id: int_field(geofence, "id")?,
        name: nonempty_str(geofence, "name"),
        area,
    })
}

/// The event's reported position, when present.
pub fn extract_position(payload: &Value) -> Option<GeoPoint> {
    let position = payload.get("position")?;
    Some(GeoPoint {
        lat: numeric(position.get("latitude")?)?,
        lng: numeric(position.get("longitude")?)?,
    })
}

/// Tolerant numeric read: vendors ship numbers both bare and as strings.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_field(value: &Value, field: &str) -> Option<i64> {
    let raw = value.get(field)?;
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn nonempty_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Finds the stop for a geofence reference, importing it on first sight.
pub struct StopResolver {
    store: Arc<dyn Store>,
    default_radius_m: f64,
}

impl StopResolver {
    pub fn new(store: Arc<dyn Store>, default_radius_m: f64) -> Self {
        Self {
            store,
            default_radius_m,
        }
    }

    /// Resolve a geofence reference to a stop.
    ///
    /// `position_hint` centers the substitute circle when the payload's
    /// area string is missing or unusable.
    pub async fn resolve(
        &self,
        tenant_id: i64,
        gref: &GeofenceRef,
        position_hint: Option<GeoPoint>,
    ) -> StoreResult<Stop> {
        // 1. Exact geofence id.
        if let Some(stop) = self
            .store
            .get_stop_by_geofence(tenant_id, gref.geofence_id)
            .await?
        {
            return Ok(stop);
        }

        // 2. Name match, healing the missing id binding. This covers stops
        // an operator created by hand before the vendor geofence id was
        // known. A name twin already bound to a different geofence is a
        // different stop and falls through to import.
        if let Some(name) = gref.name.as_deref() {
            if let Some(stop) = self.store.get_stop_by_name_ci(tenant_id, name).await? {
                if stop.geofence_id.is_none() {
                    match self
                        .store
                        .set_stop_geofence(tenant_id, stop.id, gref.geofence_id)
                        .await
                    {
                        Ok(()) => {
                            tracing::info!(
                                tenant_id,
                                stop_id = stop.id,
                                geofence_id = gref.geofence_id,
                                "Healed stop with vendor geofence id"
                            );
                            let mut healed = stop;
                            healed.geofence_id = Some(gref.geofence_id);
                            return Ok(healed);
                        }
                        Err(StoreError::Conflict(_)) => {
                            // Another event bound this geofence concurrently.
                            if let Some(existing) = self
                                .store
                                .get_stop_by_geofence(tenant_id, gref.geofence_id)
                                .await?
                            {
                                return Ok(existing);
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        // 3. First sighting of this geofence: import it.
        self.import_stop(tenant_id, gref, position_hint).await
    }

    /// Get or create the tenant's catch-all "imported" route. Idempotent:
    /// a lost create race resolves by re-reading the winner.
    pub async fn ensure_default_route(&self, tenant_id: i64) -> StoreResult<Route> {
        if let Some(route) = self
            .store
            .get_route_by_name(tenant_id, IMPORTED_ROUTE_NAME)
            .await?
        {
            return Ok(route);
        }
        match self.store.create_route(tenant_id, IMPORTED_ROUTE_NAME).await {
            Ok(route) => {
                tracing::info!(tenant_id, route_id = route.id, "Created imported route");
                Ok(route)
            }
            Err(StoreError::Conflict(_)) => self
                .store
                .get_route_by_name(tenant_id, IMPORTED_ROUTE_NAME)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound("imported route after create conflict".to_string())
                }),
            Err(err) => Err(err),
        }
    }

    async fn import_stop(
        &self,
        tenant_id: i64,
        gref: &GeofenceRef,
        position_hint: Option<GeoPoint>,
    ) -> StoreResult<Stop> {
        let route = self.ensure_default_route(tenant_id).await?;
        let parsed =
            wkt::parse_area_or_default(gref.area.as_deref(), position_hint, self.default_radius_m);
        let sort_order = self.store.count_route_stops(tenant_id, route.id).await? + 1;
        let name = gref
            .name
            .clone()
            .unwrap_or_else(|| format!("Geofence {}", gref.geofence_id));

        let new_stop = NewStop {
            tenant_id,
            route_id: route.id,
            name,
            geofence_id: Some(gref.geofence_id),
            geometry: parsed.shape,
            anchor: parsed.anchor,
            sort_order,
            geometry_note: parsed.fallback.map(|f| f.note()),
        };

        match self.store.create_stop(new_stop).await {
            Ok(stop) => {
                tracing::info!(
                    tenant_id,
                    stop_id = stop.id,
                    geofence_id = gref.geofence_id,
                    name = %stop.name,
                    "Imported stop from vendor geofence"
                );
                Ok(stop)
            }
            Err(StoreError::Conflict(_)) => {
                // A concurrent import of the same geofence won.
                tracing::debug!(
                    tenant_id,
                    geofence_id = gref.geofence_id,
                    "Lost stop import race, re-reading"
                );
                self.store
                    .get_stop_by_geofence(tenant_id, gref.geofence_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "stop for geofence {} after create conflict",
                            gref.geofence_id
                        ))
                    })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopGeometry;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn resolver() -> (Arc<dyn Store>, StopResolver) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let resolver = StopResolver::new(Arc::clone(&store), 150.0);
        (store, resolver)
    }

    #[test]
    fn test_extract_from_payload_root() {
        let payload = json!({
            "geofenceId": 42,
            "geofence": { "id": 42, "name": "Depot", "area": "CIRCLE (-58.4 -34.6, 90)" }
        });
        let gref = extract_geofence_ref(&payload).unwrap();
        assert_eq!(gref.geofence_id, 42);
        assert_eq!(gref.name.as_deref(), Some("Depot"));
        assert!(gref.area.as_deref().unwrap().starts_with("CIRCLE"));
    }

    #[test]
    fn test_extract_from_event_attributes() {
        let payload = json!({
            "event": { "attributes": { "geofenceId": "77", "geofenceName": "North Gate" } }
        });
        let gref = extract_geofence_ref(&payload).unwrap();
        assert_eq!(gref.geofence_id, 77);
        assert_eq!(gref.name.as_deref(), Some("North Gate"));
        assert_eq!(gref.area, None);
    }

    #[test]
    fn test_extract_from_additional() {
        let payload = json!({ "additional": { "geofenceId": 9 } });
        let gref = extract_geofence_ref(&payload).unwrap();
        assert_eq!(gref.geofence_id, 9);
        assert_eq!(gref.name, None);
    }

    #[test]
    fn test_extract_from_bare_geofence_object() {
        let payload = json!({ "geofence": { "id": 5, "name": "Yard" } });
        let gref = extract_geofence_ref(&payload).unwrap();
        assert_eq!(gref.geofence_id, 5);
        assert_eq!(gref.name.as_deref(), Some("Yard"));
    }

    #[test]
    fn test_extract_none_without_identifier() {
        assert_eq!(extract_geofence_ref(&json!({ "speed": 12.0 })), None);
        assert_eq!(
            extract_geofence_ref(&json!({ "geofence": { "name": "nameless" } })),
            None
        );
    }

    #[test]
    fn test_extract_position_accepts_string_numbers() {
        let payload = json!({ "position": { "latitude": "-34.6", "longitude": -58.4 } });
        let point = extract_position(&payload).unwrap();
        assert_eq!(point.lat, -34.6);
        assert_eq!(point.lng, -58.4);

        assert_eq!(extract_position(&json!({})), None);
    }

    #[tokio::test]
    async fn test_resolve_imports_unknown_geofence() {
        let (store, resolver) = resolver();
        let gref = GeofenceRef {
            geofence_id: 42,
            name: Some("Depot".to_string()),
            area: Some("CIRCLE (-58.4 -34.6, 90)".to_string()),
        };

        let stop = resolver.resolve(1, &gref, None).await.unwrap();
        assert_eq!(stop.geofence_id, Some(42));
        assert_eq!(stop.name, "Depot");
        assert_eq!(stop.sort_order, 1);
        assert!(stop.geometry_note.is_none());
        match stop.geometry {
            StopGeometry::Circle { center, radius_m } => {
                assert_eq!(center.lat, -34.6);
                assert_eq!(radius_m, 90.0);
            }
            other => panic!("expected circle, got {other:?}"),
        }

        // The catch-all route exists and owns the stop.
        let route = store.get_route_by_name(1, "imported").await.unwrap().unwrap();
        assert_eq!(stop.route_id, route.id);

        // A second identical event reuses the stop, not a duplicate.
        let again = resolver.resolve(1, &gref, None).await.unwrap();
        assert_eq!(again.id, stop.id);
        assert_eq!(store.list_stops(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_heals_name_match() {
        let (store, resolver) = resolver();
        // Operator created the stop by hand, before the vendor geofence
        // id was known.
        let manual = store
            .create_stop(NewStop {
                tenant_id: 1,
                route_id: 10,
                name: "Terminal Norte".to_string(),
                geofence_id: None,
                geometry: StopGeometry::Circle {
                    center: GeoPoint { lat: 0.0, lng: 0.0 },
                    radius_m: 80.0,
                },
                anchor: GeoPoint { lat: 0.0, lng: 0.0 },
                sort_order: 1,
                geometry_note: None,
            })
            .await
            .unwrap();

        let gref = GeofenceRef {
            geofence_id: 55,
            name: Some("TERMINAL NORTE".to_string()),
            area: None,
        };
        let stop = resolver.resolve(1, &gref, None).await.unwrap();
        assert_eq!(stop.id, manual.id);
        assert_eq!(stop.geofence_id, Some(55));

        // Subsequent events find it by geofence id directly.
        let by_id = store.get_stop_by_geofence(1, 55).await.unwrap().unwrap();
        assert_eq!(by_id.id, manual.id);
        assert_eq!(store.list_stops(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_never_rebinds_existing_geofence() {
        let (store, resolver) = resolver();
        let bound = store
            .create_stop(NewStop {
                tenant_id: 1,
                route_id: 10,
                name: "Depot".to_string(),
                geofence_id: Some(41),
                geometry: StopGeometry::Circle {
                    center: GeoPoint { lat: 0.0, lng: 0.0 },
                    radius_m: 80.0,
                },
                anchor: GeoPoint { lat: 0.0, lng: 0.0 },
                sort_order: 1,
                geometry_note: None,
            })
            .await
            .unwrap();

        // Same name, different geofence id: not the same stop. Import a
        // new one instead of touching the existing binding.
        let gref = GeofenceRef {
            geofence_id: 42,
            name: Some("Depot".to_string()),
            area: None,
        };
        let imported = resolver.resolve(1, &gref, None).await.unwrap();
        assert_ne!(imported.id, bound.id);
        assert_eq!(imported.geofence_id, Some(42));

        let untouched = store.get_stop_by_geofence(1, 41).await.unwrap().unwrap();
        assert_eq!(untouched.id, bound.id);
    }

    #[tokio::test]
    async fn test_import_without_area_records_fallback() {
        let (_store, resolver) = resolver();
        let gref = GeofenceRef {
            geofence_id: 8,
            name: None,
            area: None,
        };
        let hint = GeoPoint {
            lat: -34.6,
            lng: -58.4,
        };

        let stop = resolver.resolve(1, &gref, Some(hint)).await.unwrap();
        assert_eq!(stop.name, "Geofence 8");
        assert!(stop.geometry_note.as_deref().unwrap().contains("defaulted"));
        match stop.geometry {
            StopGeometry::Circle { center, radius_m } => {
                assert_eq!(center.lat, -34.6);
                assert_eq!(radius_m, 150.0);
            }
            other => panic!("expected circle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_default_route_is_idempotent() {
        let (store, resolver) = resolver();
        let first = resolver.ensure_default_route(1).await.unwrap();
        let second = resolver.ensure_default_route(1).await.unwrap();
        assert_eq!(first.id, second.id);

        // Per-tenant, not global.
        let other = resolver.ensure_default_route(2).await.unwrap();
        assert_ne!(other.id, first.id);
        assert!(store.get_route_by_name(2, "imported").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_increments_sort_order() {
        let (_store, resolver) = resolver();
        for (i, geofence_id) in [31, 32, 33].into_iter().enumerate() {
            let gref = GeofenceRef {
                geofence_id,
                name: None,
                area: Some("CIRCLE (1.0 2.0, 50)".to_string()),
            };
            let stop = resolver.resolve(1, &gref, None).await.unwrap();
            assert_eq!(stop.sort_order, i as u32 + 1);
        }
    }
}
