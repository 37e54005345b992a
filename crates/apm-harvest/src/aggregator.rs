// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-kind aggregators.
//!
//! Every aggregator follows the same cycle: collectors append into the live
//! buffer, a harvest swaps in a fresh buffer and ships the detached one
//! after the swap lock is released, and the transport's answer goes through
//! [`apply_outcome`] against the new live buffer.
//!
//! - [`EventAggregator`]: priority reservoir plus synthetics, for event kinds.
//! - [`MetricAggregator`]: sharded accumulator.
//! - [`SqlTraceAggregator`]: slowest distinct SQL statements.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::accumulator::{MetricName, MetricStats, MetricStatsCollection, ShardedAccumulator};
use crate::config::{AgentConfig, TelemetryKind};
use crate::error::HarvestError;
use crate::health::{HealthCounter, HealthEvent, HealthReporter};
use crate::reservoir::{EventBuffer, Prioritized, DEFAULT_SYNTHETICS_CAPACITY};
use crate::response::{apply_outcome, Outcome, Readmit, ResponseReport};
use crate::sql_trace::{SqlTraceStats, SqlTraceStatsCollection};
use crate::transport::{HarvestBatch, Transport};

pub type MetricRecord = (MetricName, MetricStats);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HarvestReport {
    pub kind: TelemetryKind,
    /// Items handed to the transport.
    pub harvested: usize,
    /// `None` when the buffer was empty and the transport was not called.
    pub outcome: Option<Outcome>,
    pub response: ResponseReport,
}

impl HarvestReport {
    fn skipped(kind: TelemetryKind) -> Self {
        Self {
            kind,
            harvested: 0,
            outcome: None,
            response: ResponseReport::default(),
        }
    }

    #[must_use]
    pub fn was_skipped(&self) -> bool {
        self.outcome.is_none()
    }
}

/// One telemetry kind as seen by the harvest scheduler.
#[async_trait]
pub trait Harvestable: Send + Sync {
    fn kind(&self) -> TelemetryKind;

    async fn harvest(&self) -> Result<HarvestReport, HarvestError>;

    /// Resets buffers and re-reads capacities. Never performs I/O.
    fn on_config_update(&self, config: &AgentConfig);
}

pub trait Collector<T>: Send + Sync {
    fn collect(&self, record: T);

    fn collect_all(&self, records: Vec<T>) {
        for record in records {
            self.collect(record);
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report(health: &dyn HealthReporter, kind: TelemetryKind, counter: HealthCounter, value: usize) {
    if value > 0 {
        health.report(HealthEvent::new(kind, counter, value as u64));
    }
}

/// Sends the batch. A transport error drops the batch like [`Outcome::Other`]
/// and is handed back so the caller can surface it.
async fn send_batch<T>(
    transport: &dyn Transport<T>,
    batch: HarvestBatch<'_, T>,
) -> (Outcome, Option<HarvestError>)
where
    T: Send + Sync + 'static,
{
    match transport.send(batch).await {
        Ok(outcome) => (outcome, None),
        Err(e) => {
            warn!("Dropping {} {} after transport failure", batch.len(), batch.kind);
            (Outcome::Other, Some(e))
        }
    }
}

fn finish(
    kind: TelemetryKind,
    health: &dyn HealthReporter,
    harvested: usize,
    outcome: Outcome,
    response: ResponseReport,
    error: Option<HarvestError>,
) -> Result<HarvestReport, HarvestError> {
    report(health, kind, HealthCounter::Sent, response.sent);
    report(health, kind, HealthCounter::Recollected, response.recollected);
    report(health, kind, HealthCounter::Dropped, response.discarded);
    if let Some(capacity) = response.resized_to {
        health.report(HealthEvent::new(kind, HealthCounter::Resized, capacity as u64));
    }

    if let Some(e) = error {
        return Err(e);
    }
    debug!(kind = %kind, harvested, outcome = ?outcome, "Harvest complete");
    Ok(HarvestReport {
        kind,
        harvested,
        outcome: Some(outcome),
        response,
    })
}

/// Buffer for one event kind.
pub struct EventAggregator<T> {
    kind: TelemetryKind,
    buffer: RwLock<EventBuffer<T>>,
    capacity: AtomicUsize,
    synthetics_capacity: usize,
    transport: Arc<dyn Transport<T>>,
    health: Arc<dyn HealthReporter>,
}

impl<T> EventAggregator<T>
where
    T: Prioritized + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        kind: TelemetryKind,
        config: &AgentConfig,
        transport: Arc<dyn Transport<T>>,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        Self::with_synthetics_capacity(kind, config, DEFAULT_SYNTHETICS_CAPACITY, transport, health)
    }

    #[must_use]
    pub fn with_synthetics_capacity(
        kind: TelemetryKind,
        config: &AgentConfig,
        synthetics_capacity: usize,
        transport: Arc<dyn Transport<T>>,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        let capacity = config.harvest.get(kind).max_samples_stored;
        Self {
            kind,
            buffer: RwLock::new(EventBuffer::with_synthetics_capacity(
                capacity,
                synthetics_capacity,
            )),
            capacity: AtomicUsize::new(capacity),
            synthetics_capacity,
            transport,
            health,
        }
    }

    fn fresh_buffer(&self) -> EventBuffer<T> {
        EventBuffer::with_synthetics_capacity(
            self.capacity.load(Ordering::Relaxed),
            self.synthetics_capacity,
        )
    }

    /// Records in the live buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock(&self.buffer).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the live buffer, which a payload-too-large answer may
    /// have lowered below the configured value.
    #[must_use]
    pub fn capacity(&self) -> usize {
        read_lock(&self.buffer).reservoir().capacity()
    }

    /// Ships only the live records matching `predicate` right away, leaving
    /// the rest for the scheduled harvest.
    pub async fn harvest_matching(
        &self,
        predicate: impl FnMut(&T) -> bool + Send,
    ) -> Result<HarvestReport, HarvestError> {
        let (items, reservoir_size) = {
            let buffer = read_lock(&self.buffer);
            (buffer.drain_matching(predicate), buffer.reservoir().capacity())
        };
        let events_seen = items.len() as u64;
        self.ship(items, reservoir_size, events_seen).await
    }

    async fn ship(
        &self,
        items: Vec<T>,
        reservoir_size: usize,
        events_seen: u64,
    ) -> Result<HarvestReport, HarvestError> {
        if items.is_empty() {
            debug!("No {} to send", self.kind);
            return Ok(HarvestReport::skipped(self.kind));
        }

        let harvested = items.len();
        let batch = HarvestBatch {
            kind: self.kind,
            items: &items,
            reservoir_size,
            events_seen,
        };
        let (outcome, error) = send_batch(self.transport.as_ref(), batch).await;
        let response = apply_outcome(outcome, items, &LiveEvents(&self.buffer));
        finish(self.kind, self.health.as_ref(), harvested, outcome, response, error)
    }
}

#[async_trait]
impl<T> Harvestable for EventAggregator<T>
where
    T: Prioritized + Send + Sync + 'static,
{
    fn kind(&self) -> TelemetryKind {
        self.kind
    }

    async fn harvest(&self) -> Result<HarvestReport, HarvestError> {
        let fresh = self.fresh_buffer();
        let detached = mem::replace(&mut *write_lock(&self.buffer), fresh);

        let dropped = detached.reservoir().take_dropped_count();
        report(self.health.as_ref(), self.kind, HealthCounter::Dropped, dropped as usize);
        let reservoir_size = detached.reservoir().capacity();
        let events_seen = detached.add_attempts();
        let items = detached.drain();

        self.ship(items, reservoir_size, events_seen).await
    }

    fn on_config_update(&self, config: &AgentConfig) {
        let capacity = config.harvest.get(self.kind).max_samples_stored;
        self.capacity.store(capacity, Ordering::Relaxed);

        let fresh = self.fresh_buffer();
        let discarded = mem::replace(&mut *write_lock(&self.buffer), fresh).len();
        report(self.health.as_ref(), self.kind, HealthCounter::Dropped, discarded);
        debug!(
            "Reset {} buffer with capacity {capacity}, discarded {discarded}",
            self.kind
        );
    }
}

impl<T> Collector<T> for EventAggregator<T>
where
    T: Prioritized + Send + Sync + 'static,
{
    fn collect(&self, record: T) {
        read_lock(&self.buffer).add(record);
        report(self.health.as_ref(), self.kind, HealthCounter::Collected, 1);
    }

    fn collect_all(&self, records: Vec<T>) {
        let count = records.len();
        read_lock(&self.buffer).add_all(records);
        report(self.health.as_ref(), self.kind, HealthCounter::Collected, count);
    }
}

struct LiveEvents<'a, T>(&'a RwLock<EventBuffer<T>>);

impl<T: Prioritized> Readmit<T> for LiveEvents<'_, T> {
    fn capacity(&self) -> Option<usize> {
        Some(read_lock(self.0).reservoir().capacity())
    }

    fn resize(&self, capacity: usize) -> usize {
        read_lock(self.0).reservoir().resize(capacity)
    }

    fn readmit(&self, item: T) -> bool {
        read_lock(self.0).add(item)
    }
}

/// Timing and count metrics. Keeps accumulating across configuration
/// updates since nothing about it is sized by configuration.
pub struct MetricAggregator {
    accumulator: ShardedAccumulator,
    transport: Arc<dyn Transport<MetricRecord>>,
    health: Arc<dyn HealthReporter>,
}

impl MetricAggregator {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport<MetricRecord>>,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            accumulator: ShardedAccumulator::new(),
            transport,
            health,
        }
    }

    pub fn merge_collection(&self, collection: MetricStatsCollection) {
        self.accumulator.merge_collection(collection);
    }
}

#[async_trait]
impl Harvestable for MetricAggregator {
    fn kind(&self) -> TelemetryKind {
        TelemetryKind::Metrics
    }

    async fn harvest(&self) -> Result<HarvestReport, HarvestError> {
        let kind = TelemetryKind::Metrics;
        let items: Vec<MetricRecord> = self.accumulator.drain_for_harvest().into_iter().collect();
        if items.is_empty() {
            debug!("No {kind} to send");
            return Ok(HarvestReport::skipped(kind));
        }

        let harvested = items.len();
        let batch = HarvestBatch {
            kind,
            items: &items,
            reservoir_size: harvested,
            events_seen: harvested as u64,
        };
        let (outcome, error) = send_batch(self.transport.as_ref(), batch).await;
        let response = apply_outcome(outcome, items, &MergeBack(&self.accumulator));
        finish(kind, self.health.as_ref(), harvested, outcome, response, error)
    }

    fn on_config_update(&self, _config: &AgentConfig) {
        debug!("Metric accumulator kept across configuration update");
    }
}

impl Collector<MetricRecord> for MetricAggregator {
    fn collect(&self, (name, stats): MetricRecord) {
        self.accumulator.merge(name, &stats);
    }

    fn collect_all(&self, records: Vec<MetricRecord>) {
        self.accumulator.merge_collection(records.into_iter().collect());
    }
}

struct MergeBack<'a>(&'a ShardedAccumulator);

impl Readmit<MetricRecord> for MergeBack<'_> {
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn resize(&self, _capacity: usize) -> usize {
        0
    }

    fn readmit(&self, (name, stats): MetricRecord) -> bool {
        self.0.merge(name, &stats);
        true
    }
}

/// Slowest SQL statements. The collection is bounded by the configured
/// `max_samples_stored` for SQL traces and each harvest ships at most
/// `max_sql_traces_per_harvest` of them.
pub struct SqlTraceAggregator {
    traces: Mutex<SqlTraceStatsCollection>,
    max_traces: AtomicUsize,
    max_per_harvest: AtomicUsize,
    transport: Arc<dyn Transport<SqlTraceStats>>,
    health: Arc<dyn HealthReporter>,
}

impl SqlTraceAggregator {
    #[must_use]
    pub fn new(
        config: &AgentConfig,
        transport: Arc<dyn Transport<SqlTraceStats>>,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        let max_traces = config.harvest.sql_traces.max_samples_stored;
        Self {
            traces: Mutex::new(SqlTraceStatsCollection::new(max_traces)),
            max_traces: AtomicUsize::new(max_traces),
            max_per_harvest: AtomicUsize::new(config.max_sql_traces_per_harvest),
            transport,
            health,
        }
    }

    /// Merges a transaction's statements into the live collection.
    pub fn collect_collection(&self, collection: SqlTraceStatsCollection) {
        let traces = collection.into_traces();
        let count = traces.len();
        let rejected = {
            let mut live = lock(&self.traces);
            traces
                .into_iter()
                .map(|trace| live.insert(trace))
                .filter(|kept| !kept)
                .count()
        };
        report(self.health.as_ref(), TelemetryKind::SqlTraces, HealthCounter::Collected, count);
        report(self.health.as_ref(), TelemetryKind::SqlTraces, HealthCounter::Dropped, rejected);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.traces).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh_collection(&self) -> SqlTraceStatsCollection {
        SqlTraceStatsCollection::new(self.max_traces.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Harvestable for SqlTraceAggregator {
    fn kind(&self) -> TelemetryKind {
        TelemetryKind::SqlTraces
    }

    async fn harvest(&self) -> Result<HarvestReport, HarvestError> {
        let kind = TelemetryKind::SqlTraces;
        let fresh = self.fresh_collection();
        let detached = mem::replace(&mut *lock(&self.traces), fresh);

        let collected = detached.len();
        let items = detached.into_slowest(self.max_per_harvest.load(Ordering::Relaxed));
        report(self.health.as_ref(), kind, HealthCounter::Dropped, collected - items.len());
        if items.is_empty() {
            debug!("No {kind} to send");
            return Ok(HarvestReport::skipped(kind));
        }

        let harvested = items.len();
        let batch = HarvestBatch {
            kind,
            items: &items,
            reservoir_size: collected,
            events_seen: collected as u64,
        };
        let (outcome, error) = send_batch(self.transport.as_ref(), batch).await;
        // a smaller SQL trace payload is not attempted
        let outcome = match outcome {
            Outcome::PayloadTooLarge => Outcome::Discard,
            other => other,
        };
        let response = apply_outcome(outcome, items, &LiveSqlTraces(&self.traces));
        finish(kind, self.health.as_ref(), harvested, outcome, response, error)
    }

    fn on_config_update(&self, config: &AgentConfig) {
        self.max_traces.store(
            config.harvest.sql_traces.max_samples_stored,
            Ordering::Relaxed,
        );
        self.max_per_harvest
            .store(config.max_sql_traces_per_harvest, Ordering::Relaxed);

        let fresh = self.fresh_collection();
        let discarded = mem::replace(&mut *lock(&self.traces), fresh).len();
        report(self.health.as_ref(), TelemetryKind::SqlTraces, HealthCounter::Dropped, discarded);
        debug!("Reset sql_traces collection, discarded {discarded}");
    }
}

impl Collector<SqlTraceStats> for SqlTraceAggregator {
    fn collect(&self, record: SqlTraceStats) {
        let kept = lock(&self.traces).insert(record);
        report(self.health.as_ref(), TelemetryKind::SqlTraces, HealthCounter::Collected, 1);
        if !kept {
            report(self.health.as_ref(), TelemetryKind::SqlTraces, HealthCounter::Dropped, 1);
        }
    }
}

struct LiveSqlTraces<'a>(&'a Mutex<SqlTraceStatsCollection>);

impl Readmit<SqlTraceStats> for LiveSqlTraces<'_> {
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn resize(&self, _capacity: usize) -> usize {
        0
    }

    fn readmit(&self, item: SqlTraceStats) -> bool {
        lock(self.0).insert(item)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::health::HealthCounters;
    use crate::reservoir::tests::Record;

    /// Records every batch and answers with queued outcomes, `Success` once
    /// the queue is empty.
    struct ScriptedTransport<T> {
        outcomes: Mutex<Vec<Result<Outcome, HarvestError>>>,
        sent: Mutex<Vec<(Vec<T>, usize, u64)>>,
    }

    impl<T> ScriptedTransport<T> {
        fn new(outcomes: Vec<Result<Outcome, HarvestError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().rev().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(Vec<T>, usize, u64)>
        where
            T: Clone,
        {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> Transport<T> for ScriptedTransport<T> {
        async fn send(&self, batch: HarvestBatch<'_, T>) -> Result<Outcome, HarvestError> {
            self.sent.lock().unwrap().push((
                batch.items.to_vec(),
                batch.reservoir_size,
                batch.events_seen,
            ));
            self.outcomes.lock().unwrap().pop().unwrap_or(Ok(Outcome::Success))
        }
    }

    fn config_with_capacity(kind: TelemetryKind, capacity: usize) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.harvest.get_mut(kind).max_samples_stored = capacity;
        config
    }

    fn events(
        capacity: usize,
        outcomes: Vec<Result<Outcome, HarvestError>>,
    ) -> (
        EventAggregator<Record>,
        Arc<ScriptedTransport<Record>>,
        Arc<HealthCounters>,
    ) {
        let transport = ScriptedTransport::<Record>::new(outcomes);
        let health = Arc::new(HealthCounters::default());
        let aggregator = EventAggregator::new(
            TelemetryKind::TransactionEvents,
            &config_with_capacity(TelemetryKind::TransactionEvents, capacity),
            transport.clone(),
            health.clone(),
        );
        (aggregator, transport, health)
    }

    fn ids(records: &[Record]) -> Vec<u32> {
        records.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_empty_harvest_skips_transport() {
        let (aggregator, transport, _) = events(10, vec![]);
        let report = aggregator.harvest().await.unwrap();
        assert!(report.was_skipped());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_harvest_sends_and_resets() {
        let (aggregator, transport, health) = events(2, vec![]);
        aggregator.collect(Record::new(1, 0.1));
        aggregator.collect_all(vec![Record::new(2, 0.9), Record::new(3, 0.5)]);

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.harvested, 2);
        assert_eq!(report.outcome, Some(Outcome::Success));
        assert!(aggregator.is_empty());

        let sent = transport.sent();
        assert_eq!(ids(&sent[0].0), vec![2, 3]);
        assert_eq!(sent[0].1, 2);
        assert_eq!(sent[0].2, 3);

        let kind = TelemetryKind::TransactionEvents;
        assert_eq!(health.get(kind, HealthCounter::Collected), 3);
        assert_eq!(health.get(kind, HealthCounter::Sent), 2);
        assert_eq!(health.get(kind, HealthCounter::Dropped), 1);
    }

    #[tokio::test]
    async fn test_post_too_big_with_two_events_resends_one() {
        let (aggregator, transport, health) = events(10, vec![Ok(Outcome::PayloadTooLarge)]);
        aggregator.collect_all(vec![Record::new(1, 0.3), Record::new(2, 0.6)]);

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.response.resized_to, Some(1));
        assert_eq!(report.response.recollected, 2);
        assert_eq!(aggregator.capacity(), 1);

        let kind = TelemetryKind::TransactionEvents;
        assert_eq!(health.get(kind, HealthCounter::Resized), 1);
        assert_eq!(health.get(kind, HealthCounter::Recollected), 2);

        aggregator.harvest().await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(ids(&sent[1].0), vec![2]);
        assert_eq!(sent[1].1, 1);
        // the configured capacity applies again after the retry
        assert_eq!(aggregator.capacity(), 10);
    }

    #[tokio::test]
    async fn test_post_too_big_with_one_event_sends_nothing_next() {
        let (aggregator, transport, _) = events(10, vec![Ok(Outcome::PayloadTooLarge)]);
        aggregator.collect(Record::new(1, 0.3));

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.response.resized_to, Some(0));
        assert_eq!(report.response.recollected, 1);

        assert!(aggregator.harvest().await.unwrap().was_skipped());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_retain_competes_with_new_records() {
        let (aggregator, transport, _) = events(2, vec![Ok(Outcome::ServiceUnavailable)]);
        aggregator.collect_all(vec![Record::new(1, 0.1), Record::new(2, 0.2)]);
        aggregator.harvest().await.unwrap();

        aggregator.collect(Record::new(3, 0.9));
        assert_eq!(aggregator.len(), 2);

        aggregator.harvest().await.unwrap();
        assert_eq!(ids(&transport.sent()[1].0), vec![3, 2]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_error_drops_batch_and_surfaces() {
        let (aggregator, _, health) = events(
            10,
            vec![Err(HarvestError::Transport {
                kind: TelemetryKind::TransactionEvents,
                message: "encode failed".to_string(),
            })],
        );
        aggregator.collect(Record::new(1, 0.1));

        let err = aggregator.harvest().await.unwrap_err();
        assert!(err.to_string().contains("encode failed"));
        assert!(aggregator.is_empty());
        assert_eq!(
            health.get(TelemetryKind::TransactionEvents, HealthCounter::Dropped),
            1
        );
        assert!(logs_contain("after transport failure"));
    }

    #[tokio::test]
    async fn test_harvest_matching_leaves_others() {
        let (aggregator, transport, _) = events(10, vec![]);
        aggregator.collect_all((1..=4).map(|id| Record::new(id, id as f32)).collect());

        let report = aggregator.harvest_matching(|r| r.id % 2 == 1).await.unwrap();
        assert_eq!(report.harvested, 2);
        assert_eq!(ids(&transport.sent()[0].0), vec![3, 1]);
        assert_eq!(aggregator.len(), 2);
    }

    #[tokio::test]
    async fn test_synthetics_are_sent_first() {
        let (aggregator, transport, _) = events(1, vec![]);
        aggregator.collect_all(vec![
            Record::new(1, 0.9),
            Record::synthetic(2),
            Record::new(3, 0.1),
        ]);
        aggregator.harvest().await.unwrap();
        assert_eq!(ids(&transport.sent()[0].0), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_config_update_resets_and_resizes() {
        let (aggregator, transport, health) = events(10, vec![]);
        aggregator.collect_all(vec![Record::new(1, 0.1), Record::new(2, 0.2)]);

        aggregator.on_config_update(&config_with_capacity(TelemetryKind::TransactionEvents, 3));
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.capacity(), 3);
        assert_eq!(
            health.get(TelemetryKind::TransactionEvents, HealthCounter::Dropped),
            2
        );

        assert!(aggregator.harvest().await.unwrap().was_skipped());
        assert!(transport.sent().is_empty());
    }

    fn metrics(
        outcomes: Vec<Result<Outcome, HarvestError>>,
    ) -> (MetricAggregator, Arc<ScriptedTransport<MetricRecord>>) {
        let transport = ScriptedTransport::<MetricRecord>::new(outcomes);
        let aggregator =
            MetricAggregator::new(transport.clone(), Arc::new(HealthCounters::default()));
        (aggregator, transport)
    }

    #[tokio::test]
    async fn test_metric_harvest_consolidates() {
        let (aggregator, transport) = metrics(vec![]);
        let name = MetricName::unscoped("Supportability/harvest");
        aggregator.collect((name, MetricStats::count(1)));
        aggregator.collect_all(vec![(name, MetricStats::count(2))]);

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.harvested, 1);
        let sent = transport.sent();
        assert_eq!(sent[0].0, vec![(name, MetricStats::count(3))]);
        assert!(aggregator.harvest().await.unwrap().was_skipped());
    }

    #[tokio::test]
    async fn test_metric_retain_merges_back() {
        let (aggregator, transport) = metrics(vec![Ok(Outcome::PayloadTooLarge)]);
        let name = MetricName::scoped("Datastore/all", "WebTransaction/home");
        aggregator.collect((name, MetricStats::timing(2.0, 1.0)));

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.response.resized_to, None);
        assert_eq!(report.response.recollected, 1);

        aggregator.collect((name, MetricStats::timing(4.0, 4.0)));
        aggregator.harvest().await.unwrap();
        let stats = transport.sent()[1].0[0].1;
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max, 4.0);
    }

    fn sql_trace(sql_id: u64, secs: u64) -> SqlTraceStats {
        SqlTraceStats::new(
            sql_id,
            "WebTransaction/home",
            "/home",
            "SELECT 1",
            "Datastore/statement/MySQL/users/select",
            Duration::from_secs(secs),
        )
    }

    fn sql_traces(
        max_per_harvest: usize,
        outcomes: Vec<Result<Outcome, HarvestError>>,
    ) -> (SqlTraceAggregator, Arc<ScriptedTransport<SqlTraceStats>>) {
        let transport = ScriptedTransport::<SqlTraceStats>::new(outcomes);
        let config = AgentConfig {
            max_sql_traces_per_harvest: max_per_harvest,
            ..AgentConfig::default()
        };
        let health = Arc::new(HealthCounters::default());
        let aggregator = SqlTraceAggregator::new(&config, transport.clone(), health);
        (aggregator, transport)
    }

    #[tokio::test]
    async fn test_sql_harvest_sends_slowest() {
        let (aggregator, transport) = sql_traces(5, vec![]);
        let mut collection = SqlTraceStatsCollection::new(200);
        for (sql_id, secs) in [(1, 10), (2, 999), (3, 30), (4, 40), (5, 50), (6, 60), (7, 70)] {
            collection.insert(sql_trace(sql_id, secs));
        }
        aggregator.collect_collection(collection);

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.harvested, 5);
        let mut sent: Vec<u64> = transport.sent()[0].0.iter().map(|t| t.sql_id).collect();
        sent.sort_unstable();
        assert_eq!(sent, vec![2, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_sql_payload_too_large_discards() {
        let (aggregator, transport) = sql_traces(10, vec![Ok(Outcome::PayloadTooLarge)]);
        aggregator.collect(sql_trace(1, 5));

        let report = aggregator.harvest().await.unwrap();
        assert_eq!(report.outcome, Some(Outcome::Discard));
        assert_eq!(report.response.discarded, 1);
        assert!(aggregator.is_empty());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_sql_retain_merges_into_live_collection() {
        let (aggregator, transport) = sql_traces(10, vec![Ok(Outcome::Retain)]);
        aggregator.collect(sql_trace(1, 5));
        aggregator.harvest().await.unwrap();

        aggregator.collect(sql_trace(1, 7));
        aggregator.harvest().await.unwrap();
        let retried = &transport.sent()[1].0[0];
        assert_eq!(retried.call_count, 2);
        assert_eq!(retried.max_call_time, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_sql_config_update_resets() {
        let (aggregator, transport) = sql_traces(10, vec![]);
        aggregator.collect(sql_trace(1, 5));
        aggregator.on_config_update(&AgentConfig::default());
        assert!(aggregator.harvest().await.unwrap().was_skipped());
        assert!(transport.sent().is_empty());
    }
}
