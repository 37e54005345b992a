// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for trace context propagation.
//!
//! Extraction failures are non-fatal. Callers record them as an
//! [`IngestError`](super::IngestError) on the resulting
//! [`TracingState`](super::TracingState) and continue without a parent
//! context.

use thiserror::Error;

/// Error during trace context extraction.
///
/// Formatted as `"Cannot {operation} from {message}, {codec}"`, e.g.
/// `"Cannot extract from invalid traceparent, traceparent"`.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot {} from {}, {}", operation, message, codec)]
pub struct Error {
    message: &'static str,
    /// Header or payload format that failed (`traceparent`, `tracestate`, `newrelic`).
    codec: &'static str,
    operation: &'static str,
}

impl Error {
    /// Creates an extraction error.
    #[must_use]
    pub fn extract(message: &'static str, codec: &'static str) -> Self {
        Self {
            message,
            codec,
            operation: "extract",
        }
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        self.message
    }

    #[must_use]
    pub fn codec(&self) -> &'static str {
        self.codec
    }
}
