// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Vehicle model.

use serde::{Deserialize, Serialize};

/// A tracked vehicle.
///
/// Auto-created on the first sighting of an unknown device with a
/// placeholder plate; operators fill in the real plate later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    /// Vehicle ID
    pub id: i64,
    /// Owning tenant
    pub tenant_id: i64,
    /// Vendor device id, unique within the tenant
    pub device_id: i64,
    /// License plate, or a placeholder until an operator edits it
    pub plate: String,
}
