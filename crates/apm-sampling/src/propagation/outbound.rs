// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound trace context headers.

use tracing::debug;

use crate::propagation::{
    carrier::Injector,
    payload::{DistributedTracePayload, PayloadFields},
    NrTracestateEntry, ParentType, Traceparent, NEWRELIC_HEADER, TRACEPARENT_HEADER,
    TRACESTATE_HEADER,
};

/// Current span state written to outgoing requests.
#[derive(Clone, Debug)]
pub struct OutboundContext<'a> {
    pub trusted_account_key: &'a str,
    pub account_id: &'a str,
    pub app_id: &'a str,
    pub trace_id: &'a str,
    pub span_id: &'a str,
    pub transaction_id: Option<&'a str>,
    pub sampled: bool,
    pub priority: f32,
    pub timestamp_ms: u64,
    /// Vendor entries received upstream, forwarded after our own entry.
    pub vendor_state_entries: &'a [String],
}

/// Writes `newrelic`, `traceparent` and `tracestate` into `injector`.
///
/// `newrelic` is skipped when `exclude_newrelic` is set or when the context
/// lacks the fields the proprietary payload requires.
pub fn insert_distributed_trace_headers(
    injector: &mut dyn Injector,
    context: &OutboundContext<'_>,
    exclude_newrelic: bool,
) {
    if !exclude_newrelic {
        let payload = DistributedTracePayload::try_build(&PayloadFields {
            parent_type: Some(ParentType::App.as_ref()),
            account_id: Some(context.account_id),
            app_id: Some(context.app_id),
            guid: Some(context.span_id),
            trace_id: Some(context.trace_id),
            trust_key: Some(context.trusted_account_key),
            priority: Some(context.priority),
            sampled: Some(context.sampled),
            timestamp_ms: context.timestamp_ms,
            transaction_id: context.transaction_id,
        });
        match payload.map(|p| p.encode()) {
            Some(Ok(encoded)) => injector.set(NEWRELIC_HEADER, encoded),
            Some(Err(e)) => debug!("{e}"),
            None => debug!("Not enough context to build the {NEWRELIC_HEADER} header"),
        }
    }

    injector.set(
        TRACEPARENT_HEADER,
        Traceparent::encode(context.trace_id, context.span_id, context.sampled),
    );

    let nr_entry = NrTracestateEntry {
        version: 0,
        parent_type: ParentType::App,
        account_id: context.account_id.to_string(),
        app_id: context.app_id.to_string(),
        span_id: Some(context.span_id.to_string()),
        transaction_id: context.transaction_id.map(str::to_string),
        sampled: Some(context.sampled),
        priority: Some(context.priority),
        timestamp_ms: context.timestamp_ms,
    }
    .encode(context.trusted_account_key);

    let tracestate = std::iter::once(nr_entry)
        .chain(context.vendor_state_entries.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");
    injector.set(TRACESTATE_HEADER, tracestate);
}
