// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fleetfine: turn raw vehicle-tracking events into billable infractions
//!
//! This crate provides the ingestion webhook and detection pipeline that
//! resolve vendor telemetry against a tenant's stop model and evaluate
//! dwell-time, segment-time, and speed-zone rules.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod time_utils;
pub mod wkt;

use std::sync::Arc;

use config::Config;
use services::EventQueue;
use store::Store;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn EventQueue>,
}
