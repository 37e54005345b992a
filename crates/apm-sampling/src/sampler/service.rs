// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-role sampler selection and caching.
//!
//! Every trace is decided by the sampler bound to its role:
//! - [`SamplerRole::Root`] when there is no accepted remote parent,
//! - [`SamplerRole::RemoteParentSampled`] / [`SamplerRole::RemoteParentNotSampled`]
//!   depending on the upstream decision.
//!
//! Adaptive and always-on/off samplers are created once per role and cached
//! until the next configuration update. Ratio samplers are stateless and
//! built on every retrieval.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::{SamplerConfig, SamplerSettings, SamplerType};
use crate::error::SamplerError;
use crate::propagation::TracingState;
use crate::sampler::{
    AdaptiveSampler, AlwaysOffSampler, AlwaysOnSampler, Sampler, SamplingParameters,
    SamplingResult, TraceIdRatioSampler,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerRole {
    Root,
    RemoteParentSampled,
    RemoteParentNotSampled,
}

impl SamplerRole {
    pub const ALL: [SamplerRole; 3] = [
        SamplerRole::Root,
        SamplerRole::RemoteParentSampled,
        SamplerRole::RemoteParentNotSampled,
    ];

    /// Role of a trace given its accepted inbound context.
    #[must_use]
    pub fn select(tracing_state: Option<&TracingState>) -> Self {
        match tracing_state
            .filter(|state| state.has_remote_parent())
            .and_then(TracingState::remote_parent_sampled)
        {
            Some(true) => SamplerRole::RemoteParentSampled,
            Some(false) => SamplerRole::RemoteParentNotSampled,
            None => SamplerRole::Root,
        }
    }
}

impl SamplerConfig {
    #[must_use]
    pub fn settings(&self, role: SamplerRole) -> SamplerSettings {
        match role {
            SamplerRole::Root => self.root,
            SamplerRole::RemoteParentSampled => self.remote_parent_sampled,
            SamplerRole::RemoteParentNotSampled => self.remote_parent_not_sampled,
        }
    }
}

pub trait SamplerFactory: Send + Sync {
    fn create(&self, sampler_type: SamplerType, ratio: Option<f32>) -> Arc<dyn Sampler>;

    /// Called before the service swaps its cache for a new configuration.
    fn on_config_update(&self, _config: &SamplerConfig) {}
}

/// Builds the stock samplers. All roles bound to `Adaptive` share one
/// adaptive sampler so they draw from the same per-interval target.
#[derive(Debug)]
pub struct DefaultSamplerFactory {
    adaptive: Arc<AdaptiveSampler>,
}

impl DefaultSamplerFactory {
    #[must_use]
    pub fn new(adaptive: Arc<AdaptiveSampler>) -> Self {
        Self { adaptive }
    }

    #[must_use]
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self::new(Arc::new(AdaptiveSampler::from_config(config)))
    }

    #[must_use]
    pub fn adaptive(&self) -> &Arc<AdaptiveSampler> {
        &self.adaptive
    }
}

impl SamplerFactory for DefaultSamplerFactory {
    fn create(&self, sampler_type: SamplerType, ratio: Option<f32>) -> Arc<dyn Sampler> {
        match sampler_type {
            SamplerType::Adaptive => self.adaptive.clone(),
            SamplerType::AlwaysOn => Arc::new(AlwaysOnSampler),
            SamplerType::AlwaysOff => Arc::new(AlwaysOffSampler),
            SamplerType::TraceIdRatioBased => match ratio {
                Some(ratio) => Arc::new(TraceIdRatioSampler::new(ratio)),
                None => {
                    warn!(
                        "Trace id ratio sampler requested without a ratio, using adaptive sampling"
                    );
                    self.adaptive.clone()
                }
            },
        }
    }

    fn on_config_update(&self, config: &SamplerConfig) {
        if self.adaptive.target() != config.adaptive_target
            || self.adaptive.interval() != config.adaptive_interval
        {
            self.adaptive
                .reconfigure(config.adaptive_target, config.adaptive_interval);
        }
    }
}

struct SamplerCache {
    config: SamplerConfig,
    slots: [OnceLock<Arc<dyn Sampler>>; 3],
}

impl SamplerCache {
    fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            slots: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
        }
    }

    fn slot(&self, role: SamplerRole) -> &OnceLock<Arc<dyn Sampler>> {
        match role {
            SamplerRole::Root => &self.slots[0],
            SamplerRole::RemoteParentSampled => &self.slots[1],
            SamplerRole::RemoteParentNotSampled => &self.slots[2],
        }
    }
}

pub struct SamplerService {
    factory: Arc<dyn SamplerFactory>,
    cache: RwLock<Arc<SamplerCache>>,
}

impl SamplerService {
    #[must_use]
    pub fn new(config: SamplerConfig, factory: Arc<dyn SamplerFactory>) -> Self {
        Self {
            factory,
            cache: RwLock::new(Arc::new(SamplerCache::new(config))),
        }
    }

    /// Service backed by [`DefaultSamplerFactory`].
    #[must_use]
    pub fn with_default_factory(config: SamplerConfig) -> Self {
        let factory = Arc::new(DefaultSamplerFactory::from_config(&config));
        Self::new(config, factory)
    }

    fn current(&self) -> Arc<SamplerCache> {
        Arc::clone(&self.cache.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sampler bound to `role`.
    pub fn get(&self, role: SamplerRole) -> Arc<dyn Sampler> {
        let cache = self.current();
        let settings = cache.config.settings(role);

        if settings.sampler_type == SamplerType::TraceIdRatioBased {
            return self.factory.create(settings.sampler_type, settings.ratio);
        }

        Arc::clone(
            cache
                .slot(role)
                .get_or_init(|| self.factory.create(settings.sampler_type, settings.ratio)),
        )
    }

    /// Replaces the configuration. Cached samplers are dropped and rebuilt
    /// lazily on next access.
    pub fn update_config(&self, config: SamplerConfig) {
        self.factory.on_config_update(&config);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = Arc::new(SamplerCache::new(config));
        debug!("Sampler cache invalidated");
    }

    #[must_use]
    pub fn select_role(tracing_state: Option<&TracingState>) -> SamplerRole {
        SamplerRole::select(tracing_state)
    }

    /// Decides a trace using the sampler for its role.
    pub fn decide(
        &self,
        parameters: &SamplingParameters<'_>,
        tracing_state: Option<&TracingState>,
    ) -> Result<SamplingResult, SamplerError> {
        self.get(SamplerRole::select(tracing_state))
            .should_sample(parameters)
    }

    /// Forwards the transaction start to every sampler built so far.
    pub fn start_transaction(&self) {
        let cache = self.current();
        for role in SamplerRole::ALL {
            if let Some(sampler) = cache.slot(role).get() {
                sampler.start_transaction();
            }
        }
    }
}
