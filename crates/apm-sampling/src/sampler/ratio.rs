// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deterministic trace id ratio sampler.
//!
//! The first 16 hex characters of the trace id are read as an unsigned 64-bit
//! value and the trace is sampled iff that value is strictly below
//! `ratio × u64::MAX`. The same trace id always yields the same decision, so
//! every agent configured with the same ratio keeps the same traces.

use crate::error::SamplerError;
use crate::sampler::{Sampler, SamplingParameters, SamplingResult};

const TRACE_ID_PREFIX_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UpperBound {
    Never,
    Always,
    Below(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceIdRatioSampler {
    bound: UpperBound,
}

impl TraceIdRatioSampler {
    /// Ratios at or below 0 never sample; ratios at or above 1 always do.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(ratio: f32) -> Self {
        let ratio = f64::from(ratio);
        let bound = if ratio.is_nan() || ratio <= 0.0 {
            UpperBound::Never
        } else if ratio >= 1.0 {
            UpperBound::Always
        } else {
            UpperBound::Below((ratio * u64::MAX as f64) as u64)
        };
        Self { bound }
    }

    fn trace_id_value(trace_id: &str) -> Result<u64, SamplerError> {
        if trace_id.is_empty() {
            return Err(SamplerError::EmptyTraceId);
        }
        if trace_id.len() < TRACE_ID_PREFIX_LEN {
            return Err(SamplerError::TraceIdTooShort);
        }
        let prefix = &trace_id.as_bytes()[..TRACE_ID_PREFIX_LEN];
        prefix.iter().try_fold(0u64, |value, byte| {
            let digit = char::from(*byte)
                .to_digit(16)
                .ok_or(SamplerError::InvalidTraceIdHex)?;
            Ok((value << 4) | u64::from(digit))
        })
    }
}

impl Sampler for TraceIdRatioSampler {
    fn should_sample(
        &self,
        parameters: &SamplingParameters<'_>,
    ) -> Result<SamplingResult, SamplerError> {
        let value = Self::trace_id_value(parameters.trace_id)?;
        let sampled = match self.bound {
            UpperBound::Never => false,
            UpperBound::Always => true,
            UpperBound::Below(bound) => value < bound,
        };
        Ok(SamplingResult::local(sampled, parameters.priority))
    }
}
