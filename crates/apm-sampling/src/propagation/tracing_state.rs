// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validated view of an inbound trace context.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::propagation::{
    carrier::Extractor, DistributedTracePayload, IngestError, ParentType, Traceparent,
    TransportType, W3cTracestate, NEWRELIC_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER,
};

/// Inbound trace context, built once per request and read-only afterwards.
///
/// When validation fails the state degrades to `ParentType::Unknown` with
/// empty identity fields, and the reasons are listed in `ingest_errors`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TracingState {
    pub parent_type: ParentType,
    pub account_id: Option<String>,
    pub app_id: Option<String>,
    /// Span id of the remote parent as reported by the agent that sent it.
    pub guid: Option<String>,
    pub trace_id: Option<String>,
    /// `traceparent` parent id. Absent for proprietary payloads.
    pub parent_id: Option<String>,
    pub transaction_id: Option<String>,
    pub sampled: Option<bool>,
    pub priority: Option<f32>,
    /// Sampled flag of `traceparent`, independent of the trusted entry.
    pub traceparent_sampled: Option<bool>,
    pub timestamp_ms: Option<u64>,
    pub transport_duration: Duration,
    pub transport_type: TransportType,
    pub vendor_state_entries: Vec<String>,
    pub ingest_errors: Vec<IngestError>,
}

impl TracingState {
    /// Builds the state from inbound request headers.
    ///
    /// W3C headers take precedence. The `newrelic` header is only consulted
    /// when `traceparent` is missing or unusable.
    pub fn accept_headers(
        carrier: &dyn Extractor,
        transport_type: TransportType,
        trusted_account_key: &str,
        transaction_start: SystemTime,
    ) -> Self {
        let traceparent_values = carrier.get_all(TRACEPARENT_HEADER);
        let mut ingest_errors = Vec::new();

        if !traceparent_values.is_empty() {
            match Traceparent::from_headers(&traceparent_values) {
                Ok(traceparent) => {
                    let tracestate = W3cTracestate::parse(
                        &carrier.get_all(TRACESTATE_HEADER),
                        trusted_account_key,
                    );
                    return Self::from_trace_context(
                        traceparent,
                        tracestate,
                        transport_type,
                        transaction_start,
                    );
                }
                Err(e) => {
                    debug!("{e}");
                    ingest_errors.push(IngestError::TraceParentParse);
                }
            }
        }

        let mut state = match carrier.get(NEWRELIC_HEADER) {
            Some(payload) => Self::accept_payload(
                payload,
                transport_type,
                trusted_account_key,
                transaction_start,
            ),
            None => Self {
                transport_type,
                ..Self::default()
            },
        };
        ingest_errors.append(&mut state.ingest_errors);
        state.ingest_errors = ingest_errors;
        state
    }

    /// Builds the state from a proprietary payload value.
    pub fn accept_payload(
        payload: &str,
        transport_type: TransportType,
        trusted_account_key: &str,
        transaction_start: SystemTime,
    ) -> Self {
        let failed = |error: IngestError| Self {
            transport_type,
            ingest_errors: vec![error],
            ..Self::default()
        };

        let payload = match DistributedTracePayload::decode(payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("{e}");
                return failed(IngestError::from(&e));
            }
        };

        if payload.guid.is_none() && payload.transaction_id.is_none() {
            return failed(IngestError::NotTraceable);
        }

        let trust_key = payload.trust_key.as_deref().unwrap_or(&payload.account_id);
        if trust_key != trusted_account_key {
            return failed(IngestError::NotTrusted);
        }

        Self {
            parent_type: payload.parent_type.parse().unwrap_or_default(),
            account_id: Some(payload.account_id),
            app_id: Some(payload.app_id),
            guid: payload.guid,
            trace_id: Some(payload.trace_id),
            parent_id: None,
            transaction_id: payload.transaction_id,
            sampled: payload.sampled,
            priority: payload.priority,
            traceparent_sampled: None,
            timestamp_ms: Some(payload.timestamp_ms),
            transport_duration: transport_duration(payload.timestamp_ms, transaction_start),
            transport_type,
            vendor_state_entries: Vec::new(),
            ingest_errors: Vec::new(),
        }
    }

    fn from_trace_context(
        traceparent: Traceparent,
        tracestate: W3cTracestate,
        transport_type: TransportType,
        transaction_start: SystemTime,
    ) -> Self {
        let mut state = Self {
            trace_id: Some(traceparent.trace_id.clone()),
            parent_id: Some(traceparent.parent_id.clone()),
            traceparent_sampled: Some(traceparent.sampled()),
            transport_type,
            vendor_state_entries: tracestate.vendor_entries,
            ingest_errors: tracestate.error.into_iter().collect(),
            ..Self::default()
        };

        if let Some(nr) = tracestate.nr {
            state.parent_type = nr.parent_type;
            state.account_id = Some(nr.account_id);
            state.app_id = Some(nr.app_id);
            state.guid = nr.span_id;
            state.transaction_id = nr.transaction_id;
            state.sampled = nr.sampled;
            state.priority = nr.priority;
            state.timestamp_ms = Some(nr.timestamp_ms);
            state.transport_duration = transport_duration(nr.timestamp_ms, transaction_start);
        }

        state
    }

    /// True when a remote parent was accepted.
    #[must_use]
    pub fn has_remote_parent(&self) -> bool {
        self.trace_id.is_some()
    }

    /// Upstream sampling decision: the trusted entry's flag, else the
    /// `traceparent` flag.
    #[must_use]
    pub fn remote_parent_sampled(&self) -> Option<bool> {
        self.sampled.or(self.traceparent_sampled)
    }
}

fn transport_duration(timestamp_ms: u64, transaction_start: SystemTime) -> Duration {
    let sent_at = UNIX_EPOCH + Duration::from_millis(timestamp_ms);
    transaction_start
        .duration_since(sent_at)
        .unwrap_or(Duration::ZERO)
}
