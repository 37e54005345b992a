// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sharded metric accumulator.
//!
//! Writers never contend on one map: each merge checks a shard out of the
//! current [`ShardPool`], merges into it without holding any lock, and checks
//! it back in. A harvest publishes a fresh pool, closes the old one and folds
//! its shards together once every checked-out shard has come back. Writers
//! that reach a closed pool get [`Stale`] and retry against the new one.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use hashbrown::HashMap;
use tracing::debug;
use ustr::Ustr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetricName {
    pub name: Ustr,
    pub scope: Option<Ustr>,
}

impl MetricName {
    #[must_use]
    pub fn unscoped(name: &str) -> Self {
        Self {
            name: Ustr::from(name),
            scope: None,
        }
    }

    #[must_use]
    pub fn scoped(name: &str, scope: &str) -> Self {
        Self {
            name: Ustr::from(name),
            scope: Some(Ustr::from(scope)),
        }
    }
}

/// Timing statistics for one metric. Times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricStats {
    pub count: u64,
    pub total: f64,
    pub total_exclusive: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl Default for MetricStats {
    fn default() -> Self {
        Self {
            count: 0,
            total: 0.0,
            total_exclusive: 0.0,
            min: 0.0,
            max: 0.0,
            sum_of_squares: 0.0,
        }
    }
}

impl MetricStats {
    /// A single timed call.
    #[must_use]
    pub fn timing(total: f64, exclusive: f64) -> Self {
        Self {
            count: 1,
            total,
            total_exclusive: exclusive,
            min: total,
            max: total,
            sum_of_squares: total * total,
        }
    }

    /// `count` occurrences with no timing.
    #[must_use]
    pub fn count(count: u64) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    fn is_timed(&self) -> bool {
        self.total != 0.0 || self.max != 0.0
    }

    /// Associative, commutative combination of two observations.
    pub fn merge(&mut self, other: &MetricStats) {
        if other.count == 0 && other.total == 0.0 {
            return;
        }
        if self.count == 0 && self.total == 0.0 {
            *self = *other;
            return;
        }
        // count-only stats carry no meaningful minimum
        self.min = match (self.is_timed(), other.is_timed()) {
            (true, true) => self.min.min(other.min),
            (false, true) => other.min,
            _ => self.min,
        };
        self.count += other.count;
        self.total += other.total;
        self.total_exclusive += other.total_exclusive;
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricStatsCollection {
    stats: HashMap<MetricName, MetricStats>,
}

impl MetricStatsCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, name: MetricName, stats: &MetricStats) {
        self.stats.entry(name).or_default().merge(stats);
    }

    pub fn merge_collection(&mut self, other: MetricStatsCollection) {
        for (name, stats) in other.stats {
            self.merge(name, &stats);
        }
    }

    #[must_use]
    pub fn get(&self, name: &MetricName) -> Option<&MetricStats> {
        self.stats.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricName, &MetricStats)> {
        self.stats.iter()
    }
}

impl IntoIterator for MetricStatsCollection {
    type Item = (MetricName, MetricStats);
    type IntoIter = hashbrown::hash_map::IntoIter<MetricName, MetricStats>;

    fn into_iter(self) -> Self::IntoIter {
        self.stats.into_iter()
    }
}

impl FromIterator<(MetricName, MetricStats)> for MetricStatsCollection {
    fn from_iter<I: IntoIterator<Item = (MetricName, MetricStats)>>(iter: I) -> Self {
        let mut collection = Self::new();
        for (name, stats) in iter {
            collection.merge(name, &stats);
        }
        collection
    }
}

/// The pool was harvested after the caller loaded it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stale;

#[derive(Default)]
struct PoolState {
    idle: Vec<MetricStatsCollection>,
    checked_out: usize,
    harvested: bool,
}

#[derive(Default)]
pub struct ShardPool {
    state: Mutex<PoolState>,
    all_returned: Condvar,
}

impl ShardPool {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes an idle shard or creates one.
    pub fn check_out(&self) -> Result<MetricStatsCollection, Stale> {
        let mut state = self.lock();
        if state.harvested {
            return Err(Stale);
        }
        state.checked_out += 1;
        Ok(state.idle.pop().unwrap_or_default())
    }

    pub fn check_in(&self, shard: MetricStatsCollection) {
        let mut state = self.lock();
        state.idle.push(shard);
        state.checked_out = state.checked_out.saturating_sub(1);
        if state.checked_out == 0 {
            self.all_returned.notify_all();
        }
    }

    /// Closes the pool to new checkouts, waits for outstanding shards and
    /// takes them all.
    fn close(&self) -> Vec<MetricStatsCollection> {
        let mut state = self.lock();
        state.harvested = true;
        while state.checked_out > 0 {
            state = self
                .all_returned
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        std::mem::take(&mut state.idle)
    }
}

#[derive(Default)]
pub struct ShardedAccumulator {
    pool: RwLock<Arc<ShardPool>>,
}

impl ShardedAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<ShardPool> {
        Arc::clone(&self.pool.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn merge(&self, name: MetricName, stats: &MetricStats) {
        self.with_shard(|shard| shard.merge(name, stats));
    }

    pub fn merge_collection(&self, collection: MetricStatsCollection) {
        let mut collection = Some(collection);
        self.with_shard(|shard| {
            if let Some(collection) = collection.take() {
                shard.merge_collection(collection);
            }
        });
    }

    fn with_shard(&self, mut apply: impl FnMut(&mut MetricStatsCollection)) {
        loop {
            let pool = self.current();
            match pool.check_out() {
                Ok(mut shard) => {
                    apply(&mut shard);
                    pool.check_in(shard);
                    return;
                }
                Err(Stale) => {
                    debug!("Metric shard pool already harvested, retrying against the new pool");
                }
            }
        }
    }

    /// Detaches every shard merged so far and folds them into one collection.
    pub fn drain_for_harvest(&self) -> MetricStatsCollection {
        let detached = {
            let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pool)
        };

        detached
            .close()
            .into_iter()
            .fold(MetricStatsCollection::new(), |mut consolidated, shard| {
                consolidated.merge_collection(shard);
                consolidated
            })
    }
}
