// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace sampling decisions.
//!
//! A [`Sampler`] decides whether a trace is kept and what priority it
//! carries. Local "sampled" decisions boost the priority by
//! [`SAMPLED_PRIORITY_BOOST`](crate::priority::SAMPLED_PRIORITY_BOOST);
//! "not sampled" decisions leave it unchanged.

use std::fmt::Debug;

use crate::error::SamplerError;
use crate::priority::{adjust, SAMPLED_PRIORITY_BOOST};
use crate::propagation::TracingState;

pub mod adaptive;
pub mod ratio;
pub mod service;

pub use adaptive::AdaptiveSampler;
pub use ratio::TraceIdRatioSampler;
pub use service::{DefaultSamplerFactory, SamplerFactory, SamplerRole, SamplerService};

/// Input to a sampling decision.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplingParameters<'a> {
    pub trace_id: &'a str,
    /// Priority of the candidate before any boost.
    pub priority: f32,
    /// Decision made by an upstream agent, if any.
    pub upstream_sampled: Option<bool>,
    pub upstream_priority: Option<f32>,
}

impl<'a> SamplingParameters<'a> {
    #[must_use]
    pub fn new(trace_id: &'a str, priority: f32) -> Self {
        Self {
            trace_id,
            priority,
            upstream_sampled: None,
            upstream_priority: None,
        }
    }

    /// Carries the upstream decision of an accepted inbound context.
    #[must_use]
    pub fn with_tracing_state(mut self, tracing_state: &TracingState) -> Self {
        self.upstream_sampled = tracing_state.sampled;
        self.upstream_priority = tracing_state.priority;
        self
    }

    /// Upstream decision, only when both flag and priority are known.
    #[must_use]
    pub fn inherited(&self) -> Option<SamplingResult> {
        match (self.upstream_sampled, self.upstream_priority) {
            (Some(sampled), Some(priority)) => Some(SamplingResult { sampled, priority }),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingResult {
    pub sampled: bool,
    pub priority: f32,
}

impl SamplingResult {
    /// Result of a local decision.
    #[must_use]
    pub fn local(sampled: bool, priority: f32) -> Self {
        Self {
            sampled,
            priority: if sampled {
                adjust(priority, SAMPLED_PRIORITY_BOOST)
            } else {
                priority
            },
        }
    }
}

pub trait Sampler: Send + Sync + Debug {
    /// Decides whether the candidate trace is sampled.
    fn should_sample(
        &self,
        parameters: &SamplingParameters<'_>,
    ) -> Result<SamplingResult, SamplerError>;

    /// Called at the start of every transaction. Samplers with a manually
    /// ticked interval roll it over here.
    fn start_transaction(&self) {}
}

/// Samples every trace.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnSampler;

impl Sampler for AlwaysOnSampler {
    fn should_sample(
        &self,
        parameters: &SamplingParameters<'_>,
    ) -> Result<SamplingResult, SamplerError> {
        Ok(SamplingResult::local(true, parameters.priority))
    }
}

/// Samples nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOffSampler;

impl Sampler for AlwaysOffSampler {
    fn should_sample(
        &self,
        parameters: &SamplingParameters<'_>,
    ) -> Result<SamplingResult, SamplerError> {
        Ok(SamplingResult::local(false, parameters.priority))
    }
}
