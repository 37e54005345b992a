// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C `tracestate` codec.
//!
//! The agent's own entry is keyed `{trusted_account_key}@nr` and its value
//! has nine `-` separated fields:
//!
//! ```text
//! {version}-{parent_type}-{account_id}-{app_id}-{span_id}-{transaction_id}-{sampled}-{priority}-{timestamp_ms}
//! ```
//!
//! Span id, transaction id, sampled and priority may be blank. Every other
//! entry is kept verbatim, in order, as vendor state.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::priority::format_priority;
use crate::propagation::{IngestError, ParentType};

const NR_FIELD_COUNT: usize = 9;
const MAX_PRIORITY_DECIMALS: usize = 6;

lazy_static! {
    static ref PRIORITY_REGEX: Regex =
        Regex::new(r"^[0-9]*(?:\.([0-9]+))?$").expect("failed creating regex");
}

/// Parsed value of the trusted `@nr` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct NrTracestateEntry {
    pub version: u32,
    pub parent_type: ParentType,
    pub account_id: String,
    pub app_id: String,
    pub span_id: Option<String>,
    pub transaction_id: Option<String>,
    pub sampled: Option<bool>,
    pub priority: Option<f32>,
    pub timestamp_ms: u64,
}

impl NrTracestateEntry {
    fn parse(value: &str) -> Option<Self> {
        if !value.is_ascii() || value.contains(',') || value.contains('=') {
            return None;
        }

        let fields: Vec<&str> = value.split('-').collect();
        if fields.len() != NR_FIELD_COUNT {
            return None;
        }

        let version = fields[0].parse::<u32>().ok()?;
        let parent_type = fields[1].parse::<u32>().ok().and_then(ParentType::from_code)?;
        let account_id = non_empty(fields[2])?;
        let app_id = non_empty(fields[3])?;
        let timestamp_ms = fields[8].parse::<u64>().ok()?;

        Some(Self {
            version,
            parent_type,
            account_id,
            app_id,
            span_id: non_empty(fields[4]),
            transaction_id: non_empty(fields[5]),
            sampled: match fields[6] {
                "1" => Some(true),
                "0" => Some(false),
                _ => None,
            },
            priority: parse_priority(fields[7]),
            timestamp_ms,
        })
    }

    /// Serializes as a complete `tracestate` list member.
    #[must_use]
    pub fn encode(&self, trusted_account_key: &str) -> String {
        format!(
            "{}@nr={}-{}-{}-{}-{}-{}-{}-{}-{}",
            trusted_account_key,
            self.version,
            self.parent_type.code().unwrap_or(0),
            self.account_id,
            self.app_id,
            self.span_id.as_deref().unwrap_or_default(),
            self.transaction_id.as_deref().unwrap_or_default(),
            match self.sampled {
                Some(true) => "1",
                Some(false) => "0",
                None => "",
            },
            self.priority.map(format_priority).unwrap_or_default(),
            self.timestamp_ms
        )
    }
}

fn non_empty(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

/// Priorities with more than six fractional digits are discarded, keeping
/// the rest of the entry.
fn parse_priority(field: &str) -> Option<f32> {
    if field.is_empty() {
        return None;
    }
    let captures = PRIORITY_REGEX.captures(field)?;
    if captures
        .get(1)
        .is_some_and(|decimals| decimals.as_str().len() > MAX_PRIORITY_DECIMALS)
    {
        return None;
    }
    field.parse::<f32>().ok()
}

/// Result of parsing all `tracestate` values of one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct W3cTracestate {
    pub nr: Option<NrTracestateEntry>,
    /// Every entry not keyed by the trusted key, trimmed, in arrival order.
    pub vendor_entries: Vec<String>,
    pub error: Option<IngestError>,
}

impl W3cTracestate {
    /// Parses `tracestate` header values.
    ///
    /// Within one header the first trusted entry wins; across headers the
    /// last header that carries one wins. Entries without `=` are dropped.
    #[must_use]
    pub fn parse(headers: &[&str], trusted_account_key: &str) -> Self {
        let nr_key = format!("{trusted_account_key}@nr");
        let mut nr_value: Option<&str> = None;
        let mut vendor_entries = Vec::new();

        for header in headers {
            let mut header_nr_value: Option<&str> = None;
            for entry in header.split(',').map(str::trim) {
                let Some((key, value)) = entry.split_once('=') else {
                    continue;
                };
                if key.trim() == nr_key {
                    header_nr_value.get_or_insert(value);
                } else {
                    vendor_entries.push(entry.to_string());
                }
            }
            if header_nr_value.is_some() {
                nr_value = header_nr_value;
            }
        }

        let Some(nr_value) = nr_value else {
            return Self {
                nr: None,
                vendor_entries,
                error: Some(IngestError::TraceStateNoNrEntry),
            };
        };

        match NrTracestateEntry::parse(nr_value) {
            Some(nr) => Self {
                nr: Some(nr),
                vendor_entries,
                error: None,
            },
            None => {
                debug!("Invalid tracestate entry for trusted key {trusted_account_key}");
                Self {
                    nr: None,
                    vendor_entries,
                    error: Some(IngestError::TraceStateInvalidNrEntry),
                }
            }
        }
    }
}
