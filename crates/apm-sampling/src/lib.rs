// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # APM Sampling
//!
//! Trace context propagation and sampling decisions for an APM agent.
//!
//! ## Overview
//!
//! - [`propagation`]: W3C `traceparent`/`tracestate` and the base64 JSON
//!   `newrelic` payload, both inbound (accept) and outbound (insert)
//! - [`sampler`]: adaptive, ratio and constant samplers plus the per-role
//!   [`SamplerService`]
//! - [`priority`]: priority generation, boosting and formatting
//! - [`config`]: sampler configuration snapshots

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

/// Sampler configuration: sampler types, per-role settings, adaptive target
pub mod config;

/// Errors returned by samplers
pub mod error;

/// Priority generation and adjustment
pub mod priority;

/// Distributed trace context codecs
pub mod propagation;

/// Sampling decisions
pub mod sampler;

pub use config::{SamplerConfig, SamplerSettings, SamplerType};
pub use error::SamplerError;
pub use sampler::{
    AdaptiveSampler, AlwaysOffSampler, AlwaysOnSampler, DefaultSamplerFactory, Sampler,
    SamplerFactory, SamplerRole, SamplerService, SamplingParameters, SamplingResult,
    TraceIdRatioSampler,
};
