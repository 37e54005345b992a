// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Contract with the component that ships harvested batches.

use async_trait::async_trait;

use crate::config::TelemetryKind;
use crate::error::HarvestError;
use crate::response::Outcome;

/// A detached batch on its way to the collector.
#[derive(Debug)]
pub struct HarvestBatch<'a, T> {
    pub kind: TelemetryKind,
    pub items: &'a [T],
    /// Capacity of the buffer the batch was drained from.
    pub reservoir_size: usize,
    /// Records offered to that buffer, kept or not.
    pub events_seen: u64,
}

impl<T> Clone for HarvestBatch<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HarvestBatch<'_, T> {}

impl<T> HarvestBatch<'_, T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Ships a batch and classifies the collector's answer.
///
/// Implementations are never called while a buffer lock is held. An `Err`
/// means the batch could not be encoded or handed off at all; the batch is
/// then dropped like an [`Outcome::Other`] answer and the error is logged by
/// the harvest loop.
#[async_trait]
pub trait Transport<T>: Send + Sync {
    async fn send(&self, batch: HarvestBatch<'_, T>) -> Result<Outcome, HarvestError>;
}
