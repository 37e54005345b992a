// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adaptive sampler.
//!
//! Aims to sample `target` traces per fixed interval:
//!
//! 1. During the very first interval the first `target` candidates are
//!    sampled (the seed) and everything after that is not.
//! 2. In later intervals, while fewer than `target` candidates have been
//!    sampled, a candidate is sampled with probability
//!    `target / seen_last_interval`.
//! 3. Once `target` is reached, sampling backs off exponentially using a
//!    precomputed ceiling table until the ceiling reaches zero.
//!
//! Rollover happens lazily on the decision path, or only on
//! [`AdaptiveSampler::tick`] / [`Sampler::start_transaction`] when the
//! sampler runs in manual interval mode (serverless processes without a
//! background clock).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error};

use crate::config::{SamplerConfig, DEFAULT_SAMPLING_INTERVAL, DEFAULT_SAMPLING_TARGET};
use crate::error::SamplerError;
use crate::sampler::{Sampler, SamplingParameters, SamplingResult};

const DONE_WITH_FIRST_INTERVAL: i64 = -1;
const BACK_OFF_EXPONENT: f64 = 0.5;
const MIN_TARGET_SAMPLES_PER_INTERVAL: i64 = 1;
const UNSET: u64 = u64::MAX;

#[derive(Debug)]
struct AdaptiveSamplerState {
    target: i64,
    interval: Duration,
    /// Ceilings for the `target + 1`, `target + 2`, ... sampled candidates.
    ceilings: Vec<i64>,
    /// `target` down to 0 during the first interval, then
    /// `DONE_WITH_FIRST_INTERVAL`.
    first_interval_samples: AtomicI64,
    seen_current_interval: AtomicI64,
    seen_last_interval: AtomicI64,
    sampled_current_interval: AtomicI64,
    /// Nanoseconds since `epoch`, `UNSET` until the first decision.
    next_interval_start: AtomicU64,
    epoch: Instant,
    interval_lock: Mutex<()>,
    manual_interval_check: bool,
    rng: Arc<Mutex<StdRng>>,
}

impl AdaptiveSamplerState {
    fn new(
        target: i64,
        interval: Duration,
        rng: Arc<Mutex<StdRng>>,
        manual_interval_check: bool,
    ) -> Self {
        Self {
            target,
            interval,
            ceilings: compute_ceilings(target),
            first_interval_samples: AtomicI64::new(target),
            seen_current_interval: AtomicI64::new(0),
            seen_last_interval: AtomicI64::new(0),
            sampled_current_interval: AtomicI64::new(0),
            next_interval_start: AtomicU64::new(UNSET),
            epoch: Instant::now(),
            interval_lock: Mutex::new(()),
            manual_interval_check,
            rng,
        }
    }

    /// Starts a new state that keeps the counters of `previous` and arms the
    /// interval immediately.
    fn carry_over(target: i64, interval: Duration, previous: &AdaptiveSamplerState) -> Self {
        let state = Self::new(
            target,
            interval,
            Arc::clone(&previous.rng),
            previous.manual_interval_check,
        );
        state.seen_current_interval.store(
            previous.seen_current_interval.load(Ordering::Acquire),
            Ordering::Release,
        );
        state.seen_last_interval.store(
            previous.seen_last_interval.load(Ordering::Acquire),
            Ordering::Release,
        );
        state.sampled_current_interval.store(
            previous.sampled_current_interval.load(Ordering::Acquire),
            Ordering::Release,
        );
        state
            .next_interval_start
            .store(state.now() + state.interval_nanos(), Ordering::Release);
        state
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(UNSET - 1)
    }

    fn interval_nanos(&self) -> u64 {
        u64::try_from(self.interval.as_nanos()).unwrap_or(UNSET - 1)
    }

    fn random_below(&self, max: i64) -> i64 {
        if max <= 0 {
            return 0;
        }
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..max)
    }

    fn ceiling(&self, sampled_current_interval: i64) -> i64 {
        usize::try_from(sampled_current_interval - self.target)
            .ok()
            .and_then(|index| self.ceilings.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the seed count before decrementing it, never going below 0.
    fn get_then_decrement_first_interval_samples(&self) -> i64 {
        loop {
            let remaining = self.first_interval_samples.load(Ordering::Acquire);
            if remaining <= 0 {
                return remaining;
            }
            if self
                .first_interval_samples
                .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return remaining;
            }
            std::hint::spin_loop();
        }
    }

    fn should_sample(&self) -> bool {
        if !self.manual_interval_check {
            self.check_and_update_interval();
        }

        self.seen_current_interval.fetch_add(1, Ordering::AcqRel);

        match self.get_then_decrement_first_interval_samples() {
            DONE_WITH_FIRST_INTERVAL => loop {
                let sampled_current = self.sampled_current_interval.load(Ordering::Acquire);
                let seen_last = self.seen_last_interval.load(Ordering::Acquire);
                // excludes the candidate being evaluated
                let seen_current = self.seen_current_interval.load(Ordering::Acquire) - 1;

                let sampled = if sampled_current < self.target {
                    self.random_below(seen_last) < self.target
                } else {
                    let ceiling = self.ceiling(sampled_current);
                    ceiling > 0 && self.random_below(seen_current) < ceiling
                };

                if !sampled {
                    return false;
                }

                // Another thread may have sampled in the meantime; re-evaluate
                // against the new count rather than over-sampling.
                if self
                    .sampled_current_interval
                    .compare_exchange(
                        sampled_current,
                        sampled_current + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    return true;
                }
                std::hint::spin_loop();
            },
            0 => false,
            _ => true,
        }
    }

    fn manual_check_and_update_interval(&self) {
        if self.manual_interval_check {
            self.check_and_update_interval();
        }
    }

    fn check_and_update_interval(&self) {
        let now = self.now();
        let interval = self.interval_nanos();

        let mut next = self.next_interval_start.load(Ordering::Acquire);
        if next == UNSET {
            let candidate = now.saturating_add(interval);
            next = match self.next_interval_start.compare_exchange(
                UNSET,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => candidate,
                Err(current) => current,
            };
        }

        if now >= next {
            let _guard = self
                .interval_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if now >= self.next_interval_start.load(Ordering::Acquire) {
                self.end_of_sampling_interval(now.saturating_add(interval));
            }
        }
    }

    fn end_of_sampling_interval(&self, next_interval_start: u64) {
        let seen = self.seen_current_interval.swap(0, Ordering::AcqRel);
        self.seen_last_interval.store(seen, Ordering::Release);
        self.sampled_current_interval.store(0, Ordering::Release);
        self.first_interval_samples
            .store(DONE_WITH_FIRST_INTERVAL, Ordering::Release);
        self.next_interval_start
            .store(next_interval_start, Ordering::Release);
        debug!("Adaptive sampling interval rolled over after {seen} candidates");
    }
}

/// `ceiling[k] = round(target^(target / (target + k)) - target^0.5)`, until
/// the value is no longer positive.
fn compute_ceilings(target: i64) -> Vec<i64> {
    let base = target as f64;
    let mut ceilings = Vec::new();
    for ordinal in target.. {
        let ratio = f64::from(target as f32 / ordinal as f32);
        let ceiling = (base.powf(ratio) - base.powf(BACK_OFF_EXPONENT)).round_ties_even() as i64;
        if ceiling <= 0 {
            break;
        }
        ceilings.push(ceiling);
    }
    ceilings
}

fn validated_target(target: i64) -> i64 {
    if target < MIN_TARGET_SAMPLES_PER_INTERVAL {
        error!(
            "Invalid sampling target {target}; it must be at least {MIN_TARGET_SAMPLES_PER_INTERVAL}. Defaulting to {DEFAULT_SAMPLING_TARGET}"
        );
        i64::from(DEFAULT_SAMPLING_TARGET)
    } else {
        target
    }
}

#[derive(Debug)]
pub struct AdaptiveSampler {
    state: RwLock<Arc<AdaptiveSamplerState>>,
}

impl AdaptiveSampler {
    /// Creates a sampler. Targets below 1 fall back to the default of 10.
    ///
    /// The interval is not started until the first decision.
    #[must_use]
    pub fn new(target: i64, interval: Duration, manual_interval_check: bool) -> Self {
        Self::with_rng(
            target,
            interval,
            manual_interval_check,
            StdRng::from_entropy(),
        )
    }

    /// Creates a sampler with a deterministic random source.
    #[must_use]
    pub fn with_seed(
        target: i64,
        interval: Duration,
        manual_interval_check: bool,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            target,
            interval,
            manual_interval_check,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(target: i64, interval: Duration, manual_interval_check: bool, rng: StdRng) -> Self {
        let state = AdaptiveSamplerState::new(
            validated_target(target),
            interval,
            Arc::new(Mutex::new(rng)),
            manual_interval_check,
        );
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    #[must_use]
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self::new(
            config.adaptive_target,
            config.adaptive_interval,
            config.manual_interval_check,
        )
    }

    fn current(&self) -> Arc<AdaptiveSamplerState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn target(&self) -> i64 {
        self.current().target
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.current().interval
    }

    /// Rolls the interval over if it has elapsed. Only has an effect in
    /// manual interval mode.
    pub fn tick(&self) {
        self.current().manual_check_and_update_interval();
    }

    /// Applies a new target and interval. Counters carry over and the new
    /// interval starts immediately.
    pub fn reconfigure(&self, target: i64, interval: Duration) {
        let target = validated_target(target);
        let interval = if interval.is_zero() {
            DEFAULT_SAMPLING_INTERVAL
        } else {
            interval
        };
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let next = AdaptiveSamplerState::carry_over(target, interval, &state);
        *state = Arc::new(next);
        debug!("Adaptive sampler reconfigured with target {target} over {interval:?}");
    }
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        Self::new(
            i64::from(DEFAULT_SAMPLING_TARGET),
            DEFAULT_SAMPLING_INTERVAL,
            false,
        )
    }
}

impl Sampler for AdaptiveSampler {
    fn should_sample(
        &self,
        parameters: &SamplingParameters<'_>,
    ) -> Result<SamplingResult, SamplerError> {
        if let Some(inherited) = parameters.inherited() {
            return Ok(inherited);
        }
        let sampled = self.current().should_sample();
        Ok(SamplingResult::local(sampled, parameters.priority))
    }

    fn start_transaction(&self) {
        self.tick();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use tracing_test::traced_test;

    use super::*;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn decide(sampler: &AdaptiveSampler) -> bool {
        sampler
            .should_sample(&SamplingParameters::new(TRACE_ID, 0.5))
            .unwrap()
            .sampled
    }

    #[test]
    fn test_ceiling_tables() {
        assert_eq!(compute_ceilings(3), vec![1, 1]);
        assert_eq!(compute_ceilings(5), vec![3, 2, 1]);
        assert_eq!(compute_ceilings(10), vec![7, 5, 4, 3, 2, 1, 1, 1]);
        assert!(compute_ceilings(1).is_empty());
    }

    #[test]
    fn test_seed_then_refuse_in_first_interval() {
        let sampler = AdaptiveSampler::with_seed(3, Duration::from_secs(60), false, 7);

        for _ in 0..3 {
            assert!(decide(&sampler));
        }
        for _ in 0..100 {
            assert!(!decide(&sampler));
        }
    }

    #[test]
    fn test_sampled_priority_is_boosted() {
        let sampler = AdaptiveSampler::with_seed(1, Duration::from_secs(60), false, 7);

        let sampled = sampler
            .should_sample(&SamplingParameters::new(TRACE_ID, 0.5))
            .unwrap();
        assert!(sampled.sampled);
        assert_eq!(sampled.priority, 1.5);

        let refused = sampler
            .should_sample(&SamplingParameters::new(TRACE_ID, 0.5))
            .unwrap();
        assert!(!refused.sampled);
        assert_eq!(refused.priority, 0.5);
    }

    #[test]
    fn test_inherited_decision_is_verbatim() {
        let sampler = AdaptiveSampler::with_seed(1, Duration::from_secs(60), false, 7);
        let parameters = SamplingParameters {
            upstream_sampled: Some(true),
            upstream_priority: Some(0.75),
            ..SamplingParameters::new(TRACE_ID, 0.1)
        };

        for _ in 0..5 {
            let result = sampler.should_sample(&parameters).unwrap();
            assert!(result.sampled);
            assert_eq!(result.priority, 0.75);
        }

        // Inherited decisions do not consume the seed.
        assert!(decide(&sampler));
    }

    #[test]
    #[traced_test]
    fn test_invalid_target_defaults_to_ten() {
        let sampler = AdaptiveSampler::with_seed(0, Duration::from_secs(60), false, 7);
        assert_eq!(sampler.target(), 10);
        assert!(logs_contain("Invalid sampling target 0"));

        for _ in 0..10 {
            assert!(decide(&sampler));
        }
        assert!(!decide(&sampler));
    }

    #[test]
    fn test_timer_mode_rolls_over_lazily() {
        let sampler = AdaptiveSampler::with_seed(3, Duration::from_millis(30), false, 7);

        for _ in 0..3 {
            assert!(decide(&sampler));
        }
        thread::sleep(Duration::from_millis(50));

        // 3 candidates seen last interval, so each of the next 3 is sampled
        // with probability 3 / 3.
        for _ in 0..3 {
            assert!(decide(&sampler));
        }
    }

    #[test]
    fn test_manual_mode_only_rolls_over_on_tick() {
        let sampler = AdaptiveSampler::with_seed(5, Duration::from_millis(20), true, 7);

        // arms the interval
        sampler.tick();
        for _ in 0..5 {
            assert!(decide(&sampler));
        }
        thread::sleep(Duration::from_millis(40));

        // No rollover without a tick: the seed stays exhausted.
        assert!(!decide(&sampler));
        assert!(!decide(&sampler));

        sampler.start_transaction();

        // 7 candidates seen last interval; keep sampling until the target
        // is hit, which takes at least 5 more decisions.
        let mut sampled = 0;
        for _ in 0..200 {
            if decide(&sampler) {
                sampled += 1;
            }
        }
        assert!(sampled >= 5, "sampled {sampled}");
        assert!(sampled < 200);
    }

    #[test]
    fn test_tick_without_manual_mode_is_a_noop() {
        let sampler = AdaptiveSampler::with_seed(2, Duration::from_millis(1), false, 7);
        sampler.tick();
        let state = sampler.current();
        assert_eq!(state.next_interval_start.load(Ordering::Acquire), UNSET);
    }

    #[test]
    fn test_reconfigure_keeps_counters() {
        let sampler = AdaptiveSampler::with_seed(2, Duration::from_secs(60), false, 7);
        for _ in 0..4 {
            decide(&sampler);
        }

        sampler.reconfigure(5, Duration::from_secs(30));
        assert_eq!(sampler.target(), 5);
        assert_eq!(sampler.interval(), Duration::from_secs(30));

        let state = sampler.current();
        assert_eq!(state.seen_current_interval.load(Ordering::Acquire), 4);
        assert_ne!(state.next_interval_start.load(Ordering::Acquire), UNSET);
        drop(state);

        for _ in 0..5 {
            assert!(decide(&sampler));
        }
        assert!(!decide(&sampler));
    }

    #[test]
    fn test_concurrent_seed_is_exact() {
        let sampler = Arc::new(AdaptiveSampler::with_seed(10, Duration::from_secs(60), false, 7));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sampler = Arc::clone(&sampler);
                thread::spawn(move || (0..250).filter(|_| decide(&sampler)).count())
            })
            .collect();

        let sampled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(sampled, 10);
    }
}
