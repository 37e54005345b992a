// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supportability counters.
//!
//! Aggregators report what happened to their records without waiting on the
//! sink: reporting never fails and never applies back-pressure.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;

use crate::config::TelemetryKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HealthCounter {
    Collected,
    Sent,
    Dropped,
    Recollected,
    /// The value is the new capacity, not an increment.
    Resized,
}

impl HealthCounter {
    pub const ALL: [HealthCounter; 5] = [
        HealthCounter::Collected,
        HealthCounter::Sent,
        HealthCounter::Dropped,
        HealthCounter::Recollected,
        HealthCounter::Resized,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthEvent {
    pub kind: TelemetryKind,
    pub counter: HealthCounter,
    pub value: u64,
}

impl HealthEvent {
    #[must_use]
    pub fn new(kind: TelemetryKind, counter: HealthCounter, value: u64) -> Self {
        Self {
            kind,
            counter,
            value,
        }
    }
}

pub trait HealthReporter: Send + Sync {
    fn report(&self, event: HealthEvent);
}

/// Writes every event to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHealthReporter;

impl HealthReporter for TracingHealthReporter {
    fn report(&self, event: HealthEvent) {
        debug!(
            kind = %event.kind,
            counter = ?event.counter,
            value = event.value,
            "Supportability counter"
        );
    }
}

/// Running totals per kind and counter.
#[derive(Debug)]
pub struct HealthCounters {
    counters: HashMap<(TelemetryKind, HealthCounter), AtomicU64>,
}

impl Default for HealthCounters {
    fn default() -> Self {
        let counters = TelemetryKind::ALL
            .into_iter()
            .flat_map(|kind| {
                HealthCounter::ALL
                    .into_iter()
                    .map(move |counter| ((kind, counter), AtomicU64::new(0)))
            })
            .collect();
        Self { counters }
    }
}

impl HealthCounters {
    #[must_use]
    pub fn get(&self, kind: TelemetryKind, counter: HealthCounter) -> u64 {
        self.counters
            .get(&(kind, counter))
            .map_or(0, |value| value.load(Ordering::Relaxed))
    }

    /// Non-zero counters at this instant.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<(TelemetryKind, HealthCounter), u64> {
        self.counters
            .iter()
            .map(|(key, value)| (*key, value.load(Ordering::Relaxed)))
            .filter(|(_, value)| *value > 0)
            .collect()
    }
}

impl HealthReporter for HealthCounters {
    fn report(&self, event: HealthEvent) {
        if let Some(value) = self.counters.get(&(event.kind, event.counter)) {
            match event.counter {
                HealthCounter::Resized => value.store(event.value, Ordering::Relaxed),
                _ => {
                    value.fetch_add(event.value, Ordering::Relaxed);
                }
            }
        }
    }
}
