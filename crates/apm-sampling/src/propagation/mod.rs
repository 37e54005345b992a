// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Distributed trace context propagation.
//!
//! Two inbound formats are understood:
//! - **W3C Trace Context**: `traceparent` plus `tracestate`, where the
//!   agent's own entry is keyed `{trusted_account_key}@nr`.
//! - **Proprietary payload**: the `newrelic` header, a base64 encoded JSON
//!   envelope `{"v":[0,1],"d":{...}}`.
//!
//! W3C headers win when present; the proprietary header is the fallback.
//! Parsing never fails across the module boundary. Problems are recorded as
//! [`IngestError`]s on the resulting [`TracingState`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod carrier;
pub mod error;
pub mod outbound;
pub mod payload;
pub mod traceparent;
pub mod tracestate;
pub mod tracing_state;

pub use outbound::{insert_distributed_trace_headers, OutboundContext};
pub use payload::{DistributedTracePayload, PayloadError};
pub use traceparent::Traceparent;
pub use tracestate::{NrTracestateEntry, W3cTracestate};
pub use tracing_state::TracingState;

/// Header carrying the proprietary base64 payload.
pub const NEWRELIC_HEADER: &str = "newrelic";

/// W3C `traceparent` header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// W3C `tracestate` header.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Reasons an inbound trace context was rejected or degraded.
///
/// These are recorded, never returned as `Err`: a request with a broken
/// context simply starts a new trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum IngestError {
    #[error("trace payload was empty")]
    NullPayload,
    #[error("trace payload version is not supported")]
    Version,
    #[error("trace payload could not be parsed")]
    Parse,
    #[error("trace payload has neither a guid nor a transaction id")]
    NotTraceable,
    #[error("trace payload trust key does not match")]
    NotTrusted,
    #[error("traceparent could not be parsed")]
    TraceParentParse,
    #[error("tracestate could not be parsed")]
    TraceStateParse,
    #[error("tracestate entry for the trusted key is invalid")]
    TraceStateInvalidNrEntry,
    #[error("tracestate has no entry for the trusted key")]
    TraceStateNoNrEntry,
    #[error("unexpected failure accepting trace context")]
    Other,
}

/// Type of the process that created the parent span.
///
/// Encoded as `0`, `1`, `2` in `tracestate` and by name in the proprietary
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ParentType {
    App,
    Browser,
    Mobile,
    #[default]
    Unknown,
}

impl ParentType {
    /// Maps a `tracestate` parent type code. Codes outside `0..=2` are invalid.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ParentType::App),
            1 => Some(ParentType::Browser),
            2 => Some(ParentType::Mobile),
            _ => None,
        }
    }

    /// `tracestate` code, `None` for `Unknown`.
    #[must_use]
    pub fn code(self) -> Option<u32> {
        match self {
            ParentType::App => Some(0),
            ParentType::Browser => Some(1),
            ParentType::Mobile => Some(2),
            ParentType::Unknown => None,
        }
    }
}

impl AsRef<str> for ParentType {
    fn as_ref(&self) -> &str {
        match self {
            ParentType::App => "App",
            ParentType::Browser => "Browser",
            ParentType::Mobile => "Mobile",
            ParentType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ParentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for ParentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "App" => Ok(ParentType::App),
            "Browser" => Ok(ParentType::Browser),
            "Mobile" => Ok(ParentType::Mobile),
            _ => Err(format!("Unknown parent type: '{s}'")),
        }
    }
}

/// Transport the inbound request arrived over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportType {
    #[default]
    Unknown,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
    Kafka,
    #[serde(rename = "JMS")]
    Jms,
    IronMQ,
    #[serde(rename = "AMQP")]
    Amqp,
    Queue,
    Other,
}

impl AsRef<str> for TransportType {
    fn as_ref(&self) -> &str {
        match self {
            TransportType::Unknown => "Unknown",
            TransportType::Http => "HTTP",
            TransportType::Https => "HTTPS",
            TransportType::Kafka => "Kafka",
            TransportType::Jms => "JMS",
            TransportType::IronMQ => "IronMQ",
            TransportType::Amqp => "AMQP",
            TransportType::Queue => "Queue",
            TransportType::Other => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_type_codes() {
        assert_eq!(ParentType::from_code(0), Some(ParentType::App));
        assert_eq!(ParentType::from_code(1), Some(ParentType::Browser));
        assert_eq!(ParentType::from_code(2), Some(ParentType::Mobile));
        assert_eq!(ParentType::from_code(3), None);
        assert_eq!(ParentType::Mobile.code(), Some(2));
        assert_eq!(ParentType::Unknown.code(), None);
    }

    #[test]
    fn test_parent_type_names() {
        assert_eq!("Browser".parse::<ParentType>(), Ok(ParentType::Browser));
        assert!("browser".parse::<ParentType>().is_err());
        assert_eq!(ParentType::App.to_string(), "App");
    }

    #[test]
    fn test_transport_type_serialization() {
        let json = serde_json::to_string(&TransportType::Amqp).expect("serialize");
        assert_eq!(json, "\"AMQP\"");
        let parsed: TransportType = serde_json::from_str("\"IronMQ\"").expect("deserialize");
        assert_eq!(parsed, TransportType::IronMQ);
        assert_eq!(TransportType::Https.as_ref(), "HTTPS");
    }
}
