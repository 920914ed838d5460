// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end detection scenarios: webhook in, infraction out.
//!
//! These run with the synchronous test queue, so a 202 response means the
//! detection pipeline has already finished for that event. Timing is driven
//! through the vendor `serverTime` field.

use axum::http::StatusCode;
use fleetfine::models::{GeoPoint, InfractionKind, StopGeometry};
use fleetfine::store::{NewSegmentRule, NewSpeedZone, NewStop, NewStopRule};
use rust_decimal_macros::dec;
use serde_json::json;

mod common;
use common::{create_test_app, post_webhook, TEST_API_KEY};

fn circle_stop(
    tenant_id: i64,
    route_id: i64,
    name: &str,
    geofence_id: Option<i64>,
    sort_order: u32,
) -> NewStop {
    NewStop {
        tenant_id,
        route_id,
        name: name.to_string(),
        geofence_id,
        geometry: StopGeometry::Circle {
            center: GeoPoint {
                lat: 37.39,
                lng: -122.08,
            },
            radius_m: 100.0,
        },
        anchor: GeoPoint {
            lat: 37.39,
            lng: -122.08,
        },
        sort_order,
        geometry_note: None,
    }
}

#[tokio::test]
async fn test_dwell_rule_fines_excess_dwell() {
    let (app, state, tenant) = create_test_app().await;

    // First enter auto-imports the stop from the vendor geofence.
    let enter = json!({
        "deviceId": "700",
        "type": "geofenceEnter",
        "geofenceId": 41,
        "geofence": { "id": 41, "name": "Main Depot", "area": "CIRCLE (-122.08 37.39, 120)" },
        "serverTime": "2026-03-01T10:00:00Z"
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let stops = state.store.list_stops(tenant.id).await.unwrap();
    assert_eq!(stops.len(), 1);
    state
        .store
        .create_stop_rule(NewStopRule {
            tenant_id: tenant.id,
            stop_id: stops[0].id,
            min_dwell_minutes: None,
            max_dwell_minutes: 5,
            fine_amount_usd: dec!(10),
            penalty_per_minute_usd: dec!(2),
            active: true,
        })
        .await
        .unwrap();

    let exit = json!({
        "deviceId": "700",
        "type": "geofenceExit",
        "geofenceId": 41,
        "serverTime": "2026-03-01T10:08:00Z"
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &exit).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let infractions = state.store.list_infractions(tenant.id).await.unwrap();
    assert_eq!(infractions.len(), 1);
    assert_eq!(infractions[0].kind, InfractionKind::DwellTime);
    assert_eq!(infractions[0].detail["dwell_minutes"], 8);

    let fines = state.store.list_fines(tenant.id).await.unwrap();
    assert_eq!(fines.len(), 1);
    // 10 + (8 - 5) * 2
    assert_eq!(fines[0].amount_usd, dec!(16.00));
    assert_eq!(fines[0].infraction_id, infractions[0].id);
}

#[tokio::test]
async fn test_speed_zone_fine_converts_knots() {
    let (app, state, tenant) = create_test_app().await;
    state
        .store
        .create_speed_zone(NewSpeedZone {
            tenant_id: tenant.id,
            geofence_id: 42,
            stop_id: None,
            route_id: None,
            max_speed_kmh: 50,
            fine_amount_usd: dec!(10),
            penalty_per_kmh_usd: dec!(2),
            active: true,
        })
        .await
        .unwrap();

    // 37.8 knots ≈ 70 km/h against a 50 km/h zone.
    let alarm = json!({
        "deviceId": "700",
        "type": "deviceOverspeed",
        "geofenceId": 42,
        "position": { "speed": 37.8 }
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &alarm).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let infractions = state.store.list_infractions(tenant.id).await.unwrap();
    assert_eq!(infractions.len(), 1);
    assert_eq!(infractions[0].kind, InfractionKind::Overspeed);
    assert_eq!(infractions[0].detail["speed_kmh"], 70);

    let fines = state.store.list_fines(tenant.id).await.unwrap();
    // 10 + (70 - 50) * 2
    assert_eq!(fines[0].amount_usd, dec!(50.00));
}

#[tokio::test]
async fn test_segment_rule_fines_late_arrival() {
    let (app, state, tenant) = create_test_app().await;
    let route = state.store.create_route(tenant.id, "line-7").await.unwrap();
    let depot = state
        .store
        .create_stop(circle_stop(tenant.id, route.id, "Depot", Some(41), 1))
        .await
        .unwrap();
    let yard = state
        .store
        .create_stop(circle_stop(tenant.id, route.id, "Yard", Some(42), 2))
        .await
        .unwrap();
    state
        .store
        .create_segment_rule(NewSegmentRule {
            tenant_id: tenant.id,
            route_id: route.id,
            from_stop_id: depot.id,
            to_stop_id: yard.id,
            expected_min_minutes: None,
            expected_max_minutes: 10,
            fine_amount_usd: dec!(5),
            penalty_per_minute_usd: dec!(1.5),
            active: true,
        })
        .await
        .unwrap();

    // Depart the depot at 10:05, arrive at the yard 15 minutes later.
    for (event_type, geofence_id, at) in [
        ("geofenceEnter", 41, "2026-03-01T10:00:00Z"),
        ("geofenceExit", 41, "2026-03-01T10:05:00Z"),
        ("geofenceEnter", 42, "2026-03-01T10:20:00Z"),
    ] {
        let body = json!({
            "deviceId": "700",
            "type": event_type,
            "geofenceId": geofence_id,
            "serverTime": at
        });
        let response = post_webhook(&app, Some(TEST_API_KEY), &body).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let infractions = state.store.list_infractions(tenant.id).await.unwrap();
    assert_eq!(infractions.len(), 1);
    assert_eq!(infractions[0].kind, InfractionKind::TimeSegment);
    assert_eq!(infractions[0].detail["from_stop_id"], depot.id);
    assert_eq!(infractions[0].detail["to_stop_id"], yard.id);

    let fines = state.store.list_fines(tenant.id).await.unwrap();
    // 5 + (15 - 10) * 1.5
    assert_eq!(fines[0].amount_usd, dec!(12.50));
}

#[tokio::test]
async fn test_exit_without_open_arrival_is_noop() {
    let (app, state, tenant) = create_test_app().await;
    let route = state.store.create_route(tenant.id, "line-7").await.unwrap();
    state
        .store
        .create_stop(circle_stop(tenant.id, route.id, "Depot", Some(41), 1))
        .await
        .unwrap();

    let exit = json!({
        "deviceId": "701",
        "type": "geofenceExit",
        "geofenceId": 41,
        "serverTime": "2026-03-01T10:08:00Z"
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &exit).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert!(state.store.list_infractions(tenant.id).await.unwrap().is_empty());
    let vehicle = state
        .store
        .get_vehicle_by_device(tenant.id, 701)
        .await
        .unwrap()
        .unwrap();
    assert!(state
        .store
        .list_arrivals(tenant.id, vehicle.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_identical_enters_reuse_vehicle_and_stop() {
    let (app, state, tenant) = create_test_app().await;

    let enter = json!({
        "deviceId": "700",
        "type": "geofenceEnter",
        "geofenceId": 41,
        "geofence": { "id": 41, "name": "Main Depot", "area": "CIRCLE (-122.08 37.39, 120)" }
    });
    for _ in 0..2 {
        let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    assert_eq!(state.store.list_vehicles(tenant.id).await.unwrap().len(), 1);
    let stops = state.store.list_stops(tenant.id).await.unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].name, "Main Depot");
    assert!(state
        .store
        .get_route_by_name(tenant.id, "imported")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_double_enter_supersedes_open_arrival() {
    let (app, state, tenant) = create_test_app().await;
    let route = state.store.create_route(tenant.id, "line-7").await.unwrap();
    state
        .store
        .create_stop(circle_stop(tenant.id, route.id, "Depot", Some(41), 1))
        .await
        .unwrap();

    for at in ["2026-03-01T10:00:00Z", "2026-03-01T10:30:00Z"] {
        let enter = json!({
            "deviceId": "700",
            "type": "geofenceEnter",
            "geofenceId": 41,
            "serverTime": at
        });
        let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let vehicle = state
        .store
        .get_vehicle_by_device(tenant.id, 700)
        .await
        .unwrap()
        .unwrap();
    let arrivals = state
        .store
        .list_arrivals(tenant.id, vehicle.id)
        .await
        .unwrap();
    assert_eq!(arrivals.len(), 2);

    // The stale arrival was closed administratively (no dwell recorded);
    // only the fresh one remains open.
    let open: Vec<_> = arrivals.iter().filter(|a| a.departed_at.is_none()).collect();
    assert_eq!(open.len(), 1);
    let superseded: Vec<_> = arrivals.iter().filter(|a| a.departed_at.is_some()).collect();
    assert_eq!(superseded.len(), 1);
    assert!(superseded[0].dwell_minutes.is_none());
    assert!(state.store.list_infractions(tenant.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_name_match_heals_geofence_id() {
    let (app, state, tenant) = create_test_app().await;
    let route = state.store.create_route(tenant.id, "line-7").await.unwrap();
    // Operator created the stop before the vendor geofence id was known.
    state
        .store
        .create_stop(circle_stop(tenant.id, route.id, "Harbor Gate", None, 1))
        .await
        .unwrap();

    let enter = json!({
        "deviceId": "700",
        "type": "geofenceEnter",
        "geofenceId": 88,
        "geofenceName": "harbor gate"
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Healed in place: same stop, now bound to the vendor id.
    let stops = state.store.list_stops(tenant.id).await.unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].name, "Harbor Gate");
    assert_eq!(stops[0].geofence_id, Some(88));

    let vehicle = state
        .store
        .get_vehicle_by_device(tenant.id, 700)
        .await
        .unwrap()
        .unwrap();
    assert!(state
        .store
        .get_open_arrival(tenant.id, vehicle.id, stops[0].id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_unparseable_area_defaults_geometry() {
    let (app, state, tenant) = create_test_app().await;

    let enter = json!({
        "deviceId": "700",
        "type": "geofenceEnter",
        "geofenceId": 99,
        "geofence": { "id": 99, "name": "Fuzzy Zone", "area": "BLOB (x)" },
        "position": { "latitude": 37.4, "longitude": -122.1 }
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let stops = state.store.list_stops(tenant.id).await.unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(
        stops[0].geometry,
        StopGeometry::Circle {
            center: GeoPoint {
                lat: 37.4,
                lng: -122.1
            },
            radius_m: 150.0
        }
    );
    let note = stops[0].geometry_note.as_deref().unwrap();
    assert!(note.contains("defaulted to circle"));
}

#[tokio::test]
async fn test_multibyte_area_defaults_geometry() {
    let (app, state, tenant) = create_test_app().await;

    let enter = json!({
        "deviceId": "700",
        "type": "geofenceEnter",
        "geofenceId": 99,
        "geofence": { "id": 99, "name": "営業所", "area": "気".repeat(20) },
        "position": { "latitude": 37.4, "longitude": -122.1 }
    });
    let response = post_webhook(&app, Some(TEST_API_KEY), &enter).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let stops = state.store.list_stops(tenant.id).await.unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].name, "営業所");
    assert!(matches!(
        stops[0].geometry,
        StopGeometry::Circle { radius_m, .. } if radius_m == 150.0
    ));
    assert!(stops[0]
        .geometry_note
        .as_deref()
        .unwrap()
        .contains("defaulted to circle"));
}
