// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Proprietary distributed trace payload carried in the `newrelic` header.
//!
//! On the wire the payload is base64 encoded JSON:
//!
//! ```text
//! {"v":[0,1],"d":{"ty":"App","ac":"1","ap":"2","id":"..","tr":"..","tk":"..","pr":0.5,"sa":true,"ti":1518469636025,"tx":".."}}
//! ```
//!
//! Decoding also accepts the raw JSON form.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::propagation::IngestError;

/// Highest major version this codec understands.
const SUPPORTED_MAJOR_VERSION: u32 = 0;
const PAYLOAD_VERSION: [u32; 2] = [0, 1];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("distributed trace payload is empty")]
    Null,
    #[error("distributed trace payload major version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("failed to parse distributed trace payload: {0}")]
    Parse(String),
    #[error("failed to encode distributed trace payload: {0}")]
    Encode(String),
}

impl From<&PayloadError> for IngestError {
    fn from(error: &PayloadError) -> Self {
        match error {
            PayloadError::Null => IngestError::NullPayload,
            PayloadError::UnsupportedVersion(_) => IngestError::Version,
            PayloadError::Parse(_) => IngestError::Parse,
            PayloadError::Encode(_) => IngestError::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistributedTracePayload {
    #[serde(skip)]
    pub version: [u32; 2],
    /// Parent type name, e.g. `App`.
    #[serde(rename = "ty")]
    pub parent_type: String,
    #[serde(rename = "ac")]
    pub account_id: String,
    #[serde(rename = "ap")]
    pub app_id: String,
    /// Span id of the parent.
    #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(rename = "tr")]
    pub trace_id: String,
    #[serde(rename = "tk", skip_serializing_if = "Option::is_none")]
    pub trust_key: Option<String>,
    #[serde(rename = "pr", skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    #[serde(rename = "sa", skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
    #[serde(rename = "ti")]
    pub timestamp_ms: u64,
    #[serde(rename = "tx", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    v: [u32; 2],
    d: &'a DistributedTracePayload,
}

#[derive(Deserialize)]
struct RawEnvelope {
    v: Option<Vec<u32>>,
    d: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    ty: Option<String>,
    ac: Option<String>,
    ap: Option<String>,
    id: Option<String>,
    tr: Option<String>,
    tk: Option<String>,
    pr: Option<f32>,
    sa: Option<bool>,
    ti: Option<u64>,
    tx: Option<String>,
}

/// Fields of an outgoing payload, before validation.
#[derive(Clone, Debug, Default)]
pub struct PayloadFields<'a> {
    pub parent_type: Option<&'a str>,
    pub account_id: Option<&'a str>,
    pub app_id: Option<&'a str>,
    pub guid: Option<&'a str>,
    pub trace_id: Option<&'a str>,
    pub trust_key: Option<&'a str>,
    pub priority: Option<f32>,
    pub sampled: Option<bool>,
    pub timestamp_ms: u64,
    pub transaction_id: Option<&'a str>,
}

fn present(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

impl DistributedTracePayload {
    /// Builds an outgoing payload.
    ///
    /// Returns `None` when type, account, app or trace id is missing, or
    /// when both guid and transaction id are missing.
    #[must_use]
    pub fn try_build(fields: &PayloadFields<'_>) -> Option<Self> {
        let guid = present(fields.guid);
        let transaction_id = present(fields.transaction_id);
        if guid.is_none() && transaction_id.is_none() {
            return None;
        }

        Some(Self {
            version: PAYLOAD_VERSION,
            parent_type: present(fields.parent_type)?,
            account_id: present(fields.account_id)?,
            app_id: present(fields.app_id)?,
            guid,
            trace_id: present(fields.trace_id)?,
            trust_key: present(fields.trust_key),
            priority: fields.priority,
            sampled: fields.sampled,
            timestamp_ms: fields.timestamp_ms,
            transaction_id,
        })
    }

    /// Serializes to the JSON envelope.
    pub fn to_json(&self) -> Result<String, PayloadError> {
        serde_json::to_string(&Envelope {
            v: self.version,
            d: self,
        })
        .map_err(|e| PayloadError::Encode(e.to_string()))
    }

    /// Serializes and base64 encodes for the `newrelic` header.
    pub fn encode(&self) -> Result<String, PayloadError> {
        self.to_json().map(|json| STANDARD.encode(json))
    }

    /// Decodes a `newrelic` header value, raw JSON or base64 JSON.
    pub fn decode(value: &str) -> Result<Self, PayloadError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(PayloadError::Null);
        }

        if value.starts_with('{') {
            return Self::from_json(value);
        }

        let bytes = STANDARD
            .decode(value)
            .map_err(|e| PayloadError::Parse(e.to_string()))?;
        let json = String::from_utf8(bytes).map_err(|e| PayloadError::Parse(e.to_string()))?;
        Self::from_json(&json)
    }

    /// Parses the JSON envelope.
    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        let raw: RawEnvelope =
            serde_json::from_str(json).map_err(|e| PayloadError::Parse(e.to_string()))?;

        let version = match raw.v.as_deref() {
            Some([major, minor, ..]) => [*major, *minor],
            _ => return Err(PayloadError::Parse("missing version".to_string())),
        };
        if version[0] > SUPPORTED_MAJOR_VERSION {
            return Err(PayloadError::UnsupportedVersion(version[0]));
        }

        let data = raw
            .d
            .ok_or_else(|| PayloadError::Parse("missing data".to_string()))?;
        let missing =
            |field: &str| PayloadError::Parse(format!("missing required field `{field}`"));

        let timestamp_ms = data.ti.unwrap_or_default();
        if timestamp_ms == 0 {
            return Err(PayloadError::Parse("timestamp must be non-zero".to_string()));
        }

        Ok(Self {
            version,
            parent_type: data.ty.ok_or_else(|| missing("ty"))?,
            account_id: data.ac.ok_or_else(|| missing("ac"))?,
            app_id: data.ap.ok_or_else(|| missing("ap"))?,
            guid: data.id,
            trace_id: data.tr.ok_or_else(|| missing("tr"))?,
            trust_key: data.tk,
            priority: data.pr,
            sampled: data.sa,
            timestamp_ms,
            transaction_id: data.tx,
        })
    }
}
