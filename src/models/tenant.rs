// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Tenant (fleet operator) model.

use serde::{Deserialize, Serialize};

/// A fleet operator account. All other records hang off a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant ID
    pub id: i64,
    /// Display name of the operator
    pub name: String,
    /// Shared secret the tracking platform presents in `x-api-key`
    pub api_key: String,
    /// Inactive tenants keep their data but stop ingesting
    pub active: bool,
}
