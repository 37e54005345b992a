// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What to do with a batch once the transport has answered.
//!
//! | Outcome | Action |
//! |---|---|
//! | `Success` | drop the batch, report it sent |
//! | `Retain`, `ConnectionError`, `ServiceUnavailable` | re-admit into the live buffer |
//! | `PayloadTooLarge` | halve the live buffer's capacity, then re-admit |
//! | `Discard`, `Other` | drop the batch |
//!
//! Re-admission goes through the buffer's normal add path so retried
//! records compete with fresh ones under the same eviction rules. A batch is
//! retried at most once per harvest: the next harvest is the retry.

use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Retain,
    ConnectionError,
    ServiceUnavailable,
    PayloadTooLarge,
    Discard,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseAction {
    Sent,
    Retain,
    ShrinkAndRetain,
    Drop,
}

impl Outcome {
    #[must_use]
    pub fn action(self) -> ResponseAction {
        match self {
            Outcome::Success => ResponseAction::Sent,
            Outcome::Retain | Outcome::ConnectionError | Outcome::ServiceUnavailable => {
                ResponseAction::Retain
            }
            Outcome::PayloadTooLarge => ResponseAction::ShrinkAndRetain,
            Outcome::Discard | Outcome::Other => ResponseAction::Drop,
        }
    }

    /// Classifies a collector HTTP status code.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Outcome::Success,
            408 | 429 | 500 => Outcome::Retain,
            503 => Outcome::ServiceUnavailable,
            413 => Outcome::PayloadTooLarge,
            400 | 401 | 403 | 404 | 405 | 407 | 409 | 410 | 411 | 414 | 415 | 417 | 431 => {
                Outcome::Discard
            }
            _ => Outcome::Other,
        }
    }
}

/// The live buffer a batch is returned to.
pub trait Readmit<T> {
    /// `None` for unbounded targets, which are never shrunk.
    fn capacity(&self) -> Option<usize>;

    /// Returns the number of residents evicted.
    fn resize(&self, capacity: usize) -> usize;

    /// Offers the item through the normal add path.
    fn readmit(&self, item: T) -> bool;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseReport {
    pub sent: usize,
    /// Items offered back to the live buffer. Those it rejects or later
    /// evicts are counted by the buffer itself.
    pub recollected: usize,
    /// Items dropped without being offered back.
    pub discarded: usize,
    pub resized_to: Option<usize>,
}

/// Applies `outcome` to `batch`, re-admitting into `target` when the
/// outcome asks for it.
pub fn apply_outcome<T, R>(outcome: Outcome, batch: Vec<T>, target: &R) -> ResponseReport
where
    R: Readmit<T> + ?Sized,
{
    let batch_len = batch.len();
    match outcome.action() {
        ResponseAction::Sent => ResponseReport {
            sent: batch_len,
            ..ResponseReport::default()
        },
        ResponseAction::Drop => {
            debug!("Discarding {batch_len} items after {outcome:?}");
            ResponseReport {
                discarded: batch_len,
                ..ResponseReport::default()
            }
        }
        ResponseAction::Retain => readmit(batch, target, ResponseReport::default()),
        ResponseAction::ShrinkAndRetain => {
            let new_capacity = batch_len / 2;
            let mut report = ResponseReport::default();
            if target.capacity().is_some_and(|capacity| new_capacity < capacity) {
                let evicted = target.resize(new_capacity);
                warn!("Payload too large, reducing capacity to {new_capacity} ({evicted} evicted)");
                report.resized_to = Some(new_capacity);
            }
            readmit(batch, target, report)
        }
    }
}

fn readmit<T, R>(batch: Vec<T>, target: &R, mut report: ResponseReport) -> ResponseReport
where
    R: Readmit<T> + ?Sized,
{
    report.recollected = batch.len();
    for item in batch {
        target.readmit(item);
    }
    report
}
