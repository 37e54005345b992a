// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::config::TelemetryKind;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error for {kind}: {message}")]
    Transport {
        kind: TelemetryKind,
        message: String,
    },

    #[error("Harvest supervisor already disposed")]
    AlreadyDisposed,

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Logging error: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            HarvestError::Config("bad interval".to_string()).to_string(),
            "Configuration error: bad interval"
        );
        assert_eq!(
            HarvestError::Transport {
                kind: TelemetryKind::SpanEvents,
                message: "connection reset".to_string(),
            }
            .to_string(),
            "Transport error for span_events: connection reset"
        );
        assert_eq!(
            HarvestError::ShutdownTimeout(Duration::from_secs(2)).to_string(),
            "Shutdown did not complete within 2s"
        );
    }
}
