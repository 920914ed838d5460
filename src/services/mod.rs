// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - the detection pipeline and its collaborators.

pub mod arrivals;
pub mod evaluator;
pub mod pipeline;
pub mod queue;
pub mod stops;
pub mod vehicles;

pub use arrivals::ArrivalTracker;
pub use evaluator::RuleEvaluator;
pub use pipeline::EventPipeline;
pub use queue::{BoundedQueue, EventQueue, InlineQueue, QueueError};
pub use stops::StopResolver;
pub use vehicles::VehicleResolver;
