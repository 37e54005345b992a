// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failures raised by samplers when the caller hands them an unusable trace id.
///
/// These indicate a bug in the caller rather than bad data from the network,
/// so they are returned instead of being folded into a "not sampled" result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("Trace ID cannot be null or empty.")]
    EmptyTraceId,

    #[error("Trace ID must be at least 16 characters long.")]
    TraceIdTooShort,

    #[error("Trace ID contains invalid hexadecimal characters.")]
    InvalidTraceIdHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SamplerError::EmptyTraceId.to_string(),
            "Trace ID cannot be null or empty."
        );
        assert_eq!(
            SamplerError::TraceIdTooShort.to_string(),
            "Trace ID must be at least 16 characters long."
        );
        assert_eq!(
            SamplerError::InvalidTraceIdHex.to_string(),
            "Trace ID contains invalid hexadecimal characters."
        );
    }
}
