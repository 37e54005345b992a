// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded priority reservoir.
//!
//! A [`Reservoir`] keeps the highest ranked `capacity` records it has seen.
//! Rank is `(priority, arrival)`: on equal priority the later arrival ranks
//! higher, so eviction is deterministic within a run.
//!
//! [`EventBuffer`] pairs a reservoir with a capped list of synthetic records
//! that bypass eviction while the list has room.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records that compete for a place in a reservoir.
pub trait Prioritized {
    fn priority(&self) -> f32;

    /// Synthetic records are kept outside the reservoir while there is room.
    fn is_synthetic(&self) -> bool {
        false
    }
}

pub const DEFAULT_SYNTHETICS_CAPACITY: usize = 200;

struct Ranked<T> {
    priority: f32,
    sequence: u64,
    item: T,
}

impl<T> Ranked<T> {
    fn rank_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap keeps the lowest ranked item on top.
impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank_cmp(self)
    }
}

struct ReservoirInner<T> {
    capacity: usize,
    heap: BinaryHeap<Ranked<T>>,
    next_sequence: u64,
    add_attempts: u64,
    dropped_count: u64,
}

impl<T: Prioritized> ReservoirInner<T> {
    fn add(&mut self, item: T) -> bool {
        self.add_attempts += 1;
        let candidate = Ranked {
            priority: item.priority(),
            sequence: self.next_sequence,
            item,
        };
        self.next_sequence += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(candidate);
            return true;
        }

        match self.heap.peek_mut() {
            Some(mut lowest) if candidate.rank_cmp(&lowest) == Ordering::Greater => {
                *lowest = candidate;
                self.dropped_count += 1;
                true
            }
            _ => {
                self.dropped_count += 1;
                false
            }
        }
    }

    fn resize(&mut self, capacity: usize) -> usize {
        self.capacity = capacity;
        let mut evicted = 0;
        while self.heap.len() > capacity {
            self.heap.pop();
            evicted += 1;
        }
        self.dropped_count += evicted as u64;
        evicted
    }
}

/// Thread-safe fixed-capacity container keeping the top ranked records.
pub struct Reservoir<T> {
    inner: Mutex<ReservoirInner<T>>,
}

impl<T: Prioritized> Reservoir<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ReservoirInner {
                capacity,
                heap: BinaryHeap::with_capacity(capacity.min(4_096)),
                next_sequence: 0,
                add_attempts: 0,
                dropped_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReservoirInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers `item`. Returns whether it is now resident.
    ///
    /// Accepting an item into a full reservoir evicts the lowest ranked
    /// resident, which is counted as dropped.
    pub fn add(&self, item: T) -> bool {
        self.lock().add(item)
    }

    /// Offers every item in order. Returns how many were accepted.
    pub fn add_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut inner = self.lock();
        items
            .into_iter()
            .fold(0, |accepted, item| accepted + usize::from(inner.add(item)))
    }

    /// Changes the capacity, evicting the lowest ranked residents when
    /// shrinking below occupancy. Returns the number evicted.
    pub fn resize(&self, capacity: usize) -> usize {
        self.lock().resize(capacity)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every call to [`add`](Self::add), accepted or not.
    #[must_use]
    pub fn add_attempts(&self) -> u64 {
        self.lock().add_attempts
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped_count
    }

    /// Returns the dropped count and resets it to zero.
    pub fn take_dropped_count(&self) -> u64 {
        std::mem::take(&mut self.lock().dropped_count)
    }

    /// Removes every resident, highest ranked first.
    pub fn drain(&self) -> Vec<T> {
        let heap = std::mem::take(&mut self.lock().heap);
        // ascending under the reversed ordering is highest rank first
        heap.into_sorted_vec()
            .into_iter()
            .map(|ranked| ranked.item)
            .collect()
    }

    /// Residents whose predicate matches are removed and returned, highest
    /// ranked first. Others stay in place.
    pub fn drain_matching(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut inner = self.lock();
        let (matched, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.heap)
            .into_vec()
            .into_iter()
            .partition(|ranked| predicate(&ranked.item));
        inner.heap = kept.into();
        drop(inner);

        let mut matched = matched;
        matched.sort();
        matched.into_iter().map(|ranked| ranked.item).collect()
    }
}

/// Reservoir plus the synthetics list drained with it.
pub struct EventBuffer<T> {
    reservoir: Reservoir<T>,
    synthetics: Mutex<Vec<T>>,
    synthetics_capacity: usize,
}

impl<T: Prioritized> EventBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_synthetics_capacity(capacity, DEFAULT_SYNTHETICS_CAPACITY)
    }

    #[must_use]
    pub fn with_synthetics_capacity(capacity: usize, synthetics_capacity: usize) -> Self {
        Self {
            reservoir: Reservoir::new(capacity),
            synthetics: Mutex::new(Vec::new()),
            synthetics_capacity,
        }
    }

    fn synthetics(&self) -> MutexGuard<'_, Vec<T>> {
        self.synthetics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synthetic records go to the synthetics list while it has room and
    /// compete in the reservoir once it is full.
    pub fn add(&self, item: T) -> bool {
        if item.is_synthetic() {
            let mut synthetics = self.synthetics();
            if synthetics.len() < self.synthetics_capacity {
                synthetics.push(item);
                return true;
            }
        }
        self.reservoir.add(item)
    }

    pub fn add_all(&self, items: impl IntoIterator<Item = T>) -> usize {
        items
            .into_iter()
            .fold(0, |accepted, item| accepted + usize::from(self.add(item)))
    }

    #[must_use]
    pub fn reservoir(&self) -> &Reservoir<T> {
        &self.reservoir
    }

    #[must_use]
    pub fn synthetics_len(&self) -> usize {
        self.synthetics().len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.synthetics_len() + self.reservoir.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records offered to this buffer, including synthetics.
    #[must_use]
    pub fn add_attempts(&self) -> u64 {
        self.reservoir.add_attempts() + self.synthetics_len() as u64
    }

    /// Synthetics first, then reservoir residents highest ranked first.
    pub fn drain(&self) -> Vec<T> {
        let mut items = std::mem::take(&mut *self.synthetics());
        items.extend(self.reservoir.drain());
        items
    }

    pub fn drain_matching(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut matched = Vec::new();
        {
            let mut synthetics = self.synthetics();
            let (taken, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *synthetics).into_iter().partition(&mut predicate);
            *synthetics = kept;
            matched.extend(taken);
        }
        matched.extend(self.reservoir.drain_matching(predicate));
        matched
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) struct Record {
        pub id: u32,
        pub priority: f32,
        pub synthetic: bool,
    }

    impl Record {
        pub(crate) fn new(id: u32, priority: f32) -> Self {
            Self {
                id,
                priority,
                synthetic: false,
            }
        }

        pub(crate) fn synthetic(id: u32) -> Self {
            Self {
                id,
                priority: 0.0,
                synthetic: true,
            }
        }
    }

    impl Prioritized for Record {
        fn priority(&self) -> f32 {
            self.priority
        }

        fn is_synthetic(&self) -> bool {
            self.synthetic
        }
    }

    fn ids(records: &[Record]) -> Vec<u32> {
        records.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_add_under_capacity() {
        let reservoir = Reservoir::new(3);
        assert!(reservoir.add(Record::new(1, 0.1)));
        assert!(reservoir.add(Record::new(2, 0.9)));
        assert!(reservoir.add(Record::new(3, 0.5)));
        assert_eq!(reservoir.len(), 3);
        assert_eq!(reservoir.dropped_count(), 0);
        assert_eq!(ids(&reservoir.drain()), vec![2, 3, 1]);
        assert!(reservoir.is_empty());
    }

    #[test]
    fn test_full_reservoir_keeps_highest() {
        let reservoir = Reservoir::new(2);
        reservoir.add(Record::new(1, 0.5));
        reservoir.add(Record::new(2, 0.6));

        assert!(!reservoir.add(Record::new(3, 0.1)));
        assert!(reservoir.add(Record::new(4, 0.7)));

        assert_eq!(reservoir.add_attempts(), 4);
        assert_eq!(reservoir.dropped_count(), 2);
        assert_eq!(ids(&reservoir.drain()), vec![4, 2]);
    }

    #[test]
    fn test_ties_favour_later_arrival() {
        let reservoir = Reservoir::new(1);
        reservoir.add(Record::new(1, 0.5));
        assert!(reservoir.add(Record::new(2, 0.5)));
        assert_eq!(ids(&reservoir.drain()), vec![2]);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let reservoir = Reservoir::new(0);
        assert!(!reservoir.add(Record::new(1, 1.0)));
        assert_eq!(reservoir.add_attempts(), 1);
        assert_eq!(reservoir.dropped_count(), 1);
        assert!(reservoir.is_empty());
    }

    #[test]
    fn test_resize_evicts_lowest() {
        let reservoir = Reservoir::new(4);
        reservoir.add_all((1..=4).map(|id| Record::new(id, id as f32 / 10.0)));

        assert_eq!(reservoir.resize(2), 2);
        assert_eq!(reservoir.capacity(), 2);
        assert_eq!(reservoir.dropped_count(), 2);

        assert_eq!(reservoir.resize(10), 0);
        assert_eq!(reservoir.take_dropped_count(), 2);
        assert_eq!(reservoir.dropped_count(), 0);
        assert_eq!(ids(&reservoir.drain()), vec![4, 3]);
    }

    #[test]
    fn test_add_all_counts_accepted() {
        let reservoir = Reservoir::new(2);
        let accepted = reservoir.add_all(vec![
            Record::new(1, 0.3),
            Record::new(2, 0.2),
            Record::new(3, 0.1),
        ]);
        assert_eq!(accepted, 2);
        assert_eq!(reservoir.add_attempts(), 3);
    }

    #[test]
    fn test_drain_matching_leaves_others() {
        let reservoir = Reservoir::new(10);
        reservoir.add_all((1..=6).map(|id| Record::new(id, id as f32)));

        let even = reservoir.drain_matching(|r| r.id % 2 == 0);
        assert_eq!(ids(&even), vec![6, 4, 2]);
        assert_eq!(ids(&reservoir.drain()), vec![5, 3, 1]);
    }

    #[test]
    fn test_concurrent_adds_fill_exactly() {
        let reservoir = Arc::new(Reservoir::new(300));

        let handles: Vec<_> = (0..100)
            .map(|thread_id| {
                let reservoir = Arc::clone(&reservoir);
                thread::spawn(move || {
                    for i in 0..3 {
                        reservoir.add(Record::new(thread_id * 3 + i, 0.5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(reservoir.len(), 300);
        assert_eq!(reservoir.dropped_count(), 0);
        assert_eq!(reservoir.add_attempts(), 300);
    }

    #[test]
    fn test_synthetics_bypass_reservoir_until_full() {
        let buffer = EventBuffer::with_synthetics_capacity(1, 2);
        buffer.add(Record::new(1, 0.9));
        assert!(buffer.add(Record::synthetic(2)));
        assert!(buffer.add(Record::synthetic(3)));
        // synthetics list full: competes in the reservoir and loses
        assert!(!buffer.add(Record::synthetic(4)));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.synthetics_len(), 2);
        assert_eq!(buffer.add_attempts(), 4);
        assert_eq!(ids(&buffer.drain()), vec![2, 3, 1]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_event_buffer_drain_matching() {
        let buffer = EventBuffer::new(10);
        buffer.add(Record::synthetic(2));
        buffer.add(Record::new(4, 0.4));
        buffer.add(Record::new(5, 0.5));

        let even = buffer.drain_matching(|r| r.id % 2 == 0);
        assert_eq!(ids(&even), vec![2, 4]);
        assert_eq!(ids(&buffer.drain()), vec![5]);
    }

    proptest! {
        #[test]
        fn prop_reservoir_keeps_top_ranked(
            capacity in 0usize..20,
            priorities in proptest::collection::vec(0u8..8, 0..60),
        ) {
            let reservoir = Reservoir::new(capacity);
            for (id, priority) in priorities.iter().enumerate() {
                reservoir.add(Record::new(id as u32, f32::from(*priority)));
                prop_assert!(reservoir.len() <= capacity);
            }
            prop_assert_eq!(reservoir.add_attempts(), priorities.len() as u64);

            let mut expected: Vec<(u8, usize)> = priorities
                .iter()
                .enumerate()
                .map(|(id, priority)| (*priority, id))
                .collect();
            expected.sort_by(|a, b| b.cmp(a));
            expected.truncate(capacity);
            let expected: Vec<u32> = expected.into_iter().map(|(_, id)| id as u32).collect();

            prop_assert_eq!(ids(&reservoir.drain()), expected);
        }
    }
}
