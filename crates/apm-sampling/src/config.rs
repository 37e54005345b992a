// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sampler configuration.
//!
//! Each trace-context role (root, remote parent sampled, remote parent not
//! sampled) is bound to a [`SamplerType`] and, for ratio-based sampling, a
//! ratio. Values come from the agent configuration snapshot and are never
//! mutated in place: an update replaces the whole [`SamplerConfig`].
//!
//! # Sampler type names
//!
//! Parsing is case-insensitive:
//! - `adaptive`, `default` → [`SamplerType::Adaptive`]
//! - `alwaysOn` → [`SamplerType::AlwaysOn`]
//! - `alwaysOff` → [`SamplerType::AlwaysOff`]
//! - `traceIdRatioBased` → [`SamplerType::TraceIdRatioBased`]
//!
//! Anything else falls back to `Adaptive` with a logged warning.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Default number of traces the adaptive sampler aims to sample per interval.
pub const DEFAULT_SAMPLING_TARGET: u32 = 10;

/// Default adaptive sampling interval.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SamplerType {
    #[default]
    Adaptive,
    AlwaysOn,
    AlwaysOff,
    TraceIdRatioBased,
}

impl SamplerType {
    /// Parses a sampler type, falling back to `Adaptive` for unknown names.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        Self::from_str(value).unwrap_or_else(|e| {
            warn!("{e}, using adaptive sampling");
            SamplerType::Adaptive
        })
    }
}

impl AsRef<str> for SamplerType {
    fn as_ref(&self) -> &str {
        match self {
            SamplerType::Adaptive => "adaptive",
            SamplerType::AlwaysOn => "alwaysOn",
            SamplerType::AlwaysOff => "alwaysOff",
            SamplerType::TraceIdRatioBased => "traceIdRatioBased",
        }
    }
}

impl FromStr for SamplerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adaptive" | "default" => Ok(SamplerType::Adaptive),
            "alwayson" => Ok(SamplerType::AlwaysOn),
            "alwaysoff" => Ok(SamplerType::AlwaysOff),
            "traceidratiobased" => Ok(SamplerType::TraceIdRatioBased),
            _ => Err(format!("Invalid sampler type: '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for SamplerType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            Ok(SamplerType::parse(&s))
        } else {
            warn!("Expected a string for sampler type, got {:?}", value);
            Ok(SamplerType::Adaptive)
        }
    }
}

/// Sampler binding for a single role.
#[derive(Clone, Copy, Debug, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub sampler_type: SamplerType,
    /// Only meaningful for [`SamplerType::TraceIdRatioBased`].
    pub ratio: Option<f32>,
}

impl SamplerSettings {
    /// Builds settings from a type and an optional ratio.
    ///
    /// The ratio is discarded unless the type is ratio based, so a stale ratio
    /// from a previous configuration never leaks into another sampler type.
    #[must_use]
    pub fn new(sampler_type: SamplerType, ratio: Option<f32>) -> Self {
        let ratio = match sampler_type {
            SamplerType::TraceIdRatioBased => ratio,
            _ => None,
        };
        Self {
            sampler_type,
            ratio,
        }
    }

    #[must_use]
    pub fn always_on() -> Self {
        Self::new(SamplerType::AlwaysOn, None)
    }

    #[must_use]
    pub fn always_off() -> Self {
        Self::new(SamplerType::AlwaysOff, None)
    }
}

/// Complete sampler configuration snapshot.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub root: SamplerSettings,
    pub remote_parent_sampled: SamplerSettings,
    pub remote_parent_not_sampled: SamplerSettings,
    /// Adaptive sampler target per interval. Values below 1 fall back to
    /// [`DEFAULT_SAMPLING_TARGET`] when the sampler is built.
    pub adaptive_target: i64,
    #[serde(with = "duration_secs")]
    pub adaptive_interval: Duration,
    /// Serverless processes have no background clock, so interval rollover
    /// is driven by explicit ticks.
    pub manual_interval_check: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            root: SamplerSettings::default(),
            remote_parent_sampled: SamplerSettings::always_on(),
            remote_parent_not_sampled: SamplerSettings::always_off(),
            adaptive_target: i64::from(DEFAULT_SAMPLING_TARGET),
            adaptive_interval: DEFAULT_SAMPLING_INTERVAL,
            manual_interval_check: false,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
