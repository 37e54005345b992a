// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Slow SQL statistics keyed by normalized statement id.

use std::time::Duration;

use hashbrown::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct SqlTraceStats {
    pub sql_id: u64,
    pub transaction_name: String,
    pub uri: String,
    pub sql: String,
    pub datastore_metric_name: String,
    pub call_count: u64,
    pub total_call_time: Duration,
    pub min_call_time: Duration,
    pub max_call_time: Duration,
    pub parameters: HashMap<String, String>,
}

impl SqlTraceStats {
    /// One observed call.
    #[must_use]
    pub fn new(
        sql_id: u64,
        transaction_name: impl Into<String>,
        uri: impl Into<String>,
        sql: impl Into<String>,
        datastore_metric_name: impl Into<String>,
        call_time: Duration,
    ) -> Self {
        Self {
            sql_id,
            transaction_name: transaction_name.into(),
            uri: uri.into(),
            sql: sql.into(),
            datastore_metric_name: datastore_metric_name.into(),
            call_count: 1,
            total_call_time: call_time,
            min_call_time: call_time,
            max_call_time: call_time,
            parameters: HashMap::new(),
        }
    }

    /// Folds `other` into `self`. Descriptive fields follow whichever side
    /// recorded the slower call.
    pub fn merge(&mut self, other: SqlTraceStats) {
        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.min_call_time = self.min_call_time.min(other.min_call_time);

        if other.max_call_time > self.max_call_time {
            self.max_call_time = other.max_call_time;
            self.transaction_name = other.transaction_name;
            self.uri = other.uri;
            self.sql = other.sql;
            self.datastore_metric_name = other.datastore_metric_name;
            self.parameters = other.parameters;
        }
    }
}

struct Entry {
    stats: SqlTraceStats,
    sequence: u64,
}

/// At most `max_traces` statements, keeping the slowest.
pub struct SqlTraceStatsCollection {
    max_traces: usize,
    traces: HashMap<u64, Entry>,
    next_sequence: u64,
}

impl SqlTraceStatsCollection {
    #[must_use]
    pub fn new(max_traces: usize) -> Self {
        Self {
            max_traces,
            traces: HashMap::new(),
            next_sequence: 0,
        }
    }

    #[must_use]
    pub fn max_traces(&self) -> usize {
        self.max_traces
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    #[must_use]
    pub fn get(&self, sql_id: u64) -> Option<&SqlTraceStats> {
        self.traces.get(&sql_id).map(|entry| &entry.stats)
    }

    /// Merges into an existing statement or adds a new one. When full, a new
    /// statement replaces the fastest resident if it is at least as slow;
    /// among equally fast residents the oldest goes. Returns whether the
    /// trace was kept.
    pub fn insert(&mut self, trace: SqlTraceStats) -> bool {
        if let Some(entry) = self.traces.get_mut(&trace.sql_id) {
            entry.stats.merge(trace);
            return true;
        }

        if self.traces.len() >= self.max_traces {
            let fastest = self
                .traces
                .iter()
                .min_by_key(|(_, entry)| (entry.stats.max_call_time, entry.sequence))
                .map(|(sql_id, entry)| (*sql_id, entry.stats.max_call_time));

            match fastest {
                Some((sql_id, max_call_time)) if trace.max_call_time >= max_call_time => {
                    self.traces.remove(&sql_id);
                }
                _ => return false,
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.traces.insert(trace.sql_id, Entry { stats: trace, sequence });
        true
    }

    /// Inserts every trace of `other` in the order it first saw them.
    pub fn merge(&mut self, other: SqlTraceStatsCollection) {
        for trace in other.into_traces() {
            self.insert(trace);
        }
    }

    /// Traces in insertion order.
    #[must_use]
    pub fn into_traces(self) -> Vec<SqlTraceStats> {
        let mut entries: Vec<Entry> = self.traces.into_values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.stats).collect()
    }

    /// The `n` slowest traces, slowest first.
    #[must_use]
    pub fn into_slowest(self, n: usize) -> Vec<SqlTraceStats> {
        let mut entries: Vec<Entry> = self.traces.into_values().collect();
        entries.sort_by(|a, b| {
            (b.stats.max_call_time, b.sequence).cmp(&(a.stats.max_call_time, a.sequence))
        });
        entries.truncate(n);
        entries.into_iter().map(|entry| entry.stats).collect()
    }
}
