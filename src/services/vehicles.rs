// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vehicle resolution: device id → known vehicle, creating a placeholder
//! on first sighting.

use std::sync::Arc;

use serde_json::Value;

use crate::models::Vehicle;
use crate::store::{Store, StoreError, StoreResult};

/// Upper bound on auto-generated placeholder plates.
const PLATE_MAX_LEN: usize = 20;

/// A vendor device id after numeric normalization.
///
/// `coerced` is set when the raw value only parsed after stripping
/// non-digit noise, so the decision is visible in logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub value: i64,
    pub coerced: bool,
}

/// The raw device id did not contain a usable number.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Device id is not numeric: {raw:?}")]
pub struct InvalidDeviceId {
    pub raw: String,
}

/// Parse a vendor device id. Vendors occasionally wrap the number in
/// prefixes or separators; strip all non-digits and retry once before
/// giving up.
pub fn parse_device_id(raw: &str) -> Result<DeviceId, InvalidDeviceId> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(DeviceId {
            value,
            coerced: false,
        });
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(InvalidDeviceId {
            raw: raw.to_string(),
        });
    }
    digits
        .parse::<i64>()
        .map(|value| DeviceId {
            value,
            coerced: true,
        })
        .map_err(|_| InvalidDeviceId {
            raw: raw.to_string(),
        })
}

/// Finds the vehicle for a device id, auto-creating a placeholder when the
/// device has never been seen.
pub struct VehicleResolver {
    store: Arc<dyn Store>,
}

impl VehicleResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve a device to a vehicle.
    ///
    /// Losing a concurrent create race is recovered by re-reading the
    /// winner's record; any other create failure propagates, and the
    /// caller skips the rest of the event.
    pub async fn resolve(
        &self,
        tenant_id: i64,
        device: &DeviceId,
        payload: &Value,
    ) -> StoreResult<Vehicle> {
        if device.coerced {
            tracing::debug!(
                tenant_id,
                device_id = device.value,
                "Device id contained non-digit noise"
            );
        }

        if let Some(vehicle) = self
            .store
            .get_vehicle_by_device(tenant_id, device.value)
            .await?
        {
            return Ok(vehicle);
        }

        let plate = placeholder_plate(device.value, payload);
        match self
            .store
            .create_vehicle(tenant_id, device.value, &plate)
            .await
        {
            Ok(vehicle) => {
                tracing::info!(
                    tenant_id,
                    device_id = device.value,
                    vehicle_id = vehicle.id,
                    plate = %vehicle.plate,
                    "Auto-created vehicle for unknown device"
                );
                Ok(vehicle)
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(
                    tenant_id,
                    device_id = device.value,
                    "Lost vehicle create race, re-reading"
                );
                self.store
                    .get_vehicle_by_device(tenant_id, device.value)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!(
                            "vehicle for device {} after create conflict",
                            device.value
                        ))
                    })
            }
            Err(err) => Err(err),
        }
    }
}

/// Placeholder plate for an auto-created vehicle: the device hint's plate,
/// else its name, else `PENDING-<deviceId>`.
fn placeholder_plate(device_id: i64, payload: &Value) -> String {
    let hint = payload.get("device");
    let from_hint = hint
        .and_then(|d| nonempty_str(d, "plate"))
        .or_else(|| hint.and_then(|d| nonempty_str(d, "name")));

    let plate = from_hint.unwrap_or_else(|| format!("PENDING-{device_id}"));
    plate.chars().take(PLATE_MAX_LEN).collect()
}

fn nonempty_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
