// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # APM Harvest
//!
//! Buffers telemetry produced by many threads and periodically ships it.
//!
//! Records flow `Collector::collect -> buffer -> Harvestable::harvest ->
//! Transport::send -> apply_outcome`. The [`HarvestSupervisor`] schedules
//! harvests per [`TelemetryKind`] and owns the lifecycle.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

/// Sharded metric accumulation
pub mod accumulator;

/// Per-kind aggregators
pub mod aggregator;

/// Agent configuration snapshot and publication
pub mod config;

pub mod error;

/// Supportability counters
pub mod health;

/// Log formatting and subscriber installation
pub mod logger;

/// Bounded priority reservoir and synthetics buffer
pub mod reservoir;

/// Handling of transport outcomes
pub mod response;

/// Slow SQL statement statistics
pub mod sql_trace;

/// Harvest scheduling and lifecycle
pub mod supervisor;

/// Transport contract
pub mod transport;

pub use aggregator::{
    Collector, EventAggregator, HarvestReport, Harvestable, MetricAggregator, MetricRecord,
    SqlTraceAggregator,
};
pub use config::{AgentConfig, ConfigWatch, HarvestSettings, LogLevel, TelemetryKind};
pub use error::HarvestError;
pub use health::{HealthCounter, HealthCounters, HealthEvent, HealthReporter, TracingHealthReporter};
pub use reservoir::{EventBuffer, Prioritized, Reservoir};
pub use response::{apply_outcome, Outcome, ResponseAction, ResponseReport};
pub use supervisor::{HarvestSupervisor, SupervisorState};
pub use transport::{HarvestBatch, Transport};
