// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! W3C `traceparent` codec.
//!
//! Format: `{version}-{trace_id}-{parent_id}-{flags}`, two, thirty-two,
//! sixteen and two lowercase hex digits. Future versions may append more
//! `-` separated fields; version `00` may not.

use lazy_static::lazy_static;
use regex::Regex;

use crate::propagation::error::Error;

const SAMPLED_FLAG: u8 = 0x01;

lazy_static! {
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Traceparent {
    pub version: u8,
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub parent_id: String,
    pub flags: u8,
}

impl Traceparent {
    /// Parses a single `traceparent` header value.
    pub fn parse(traceparent: &str) -> Result<Self, Error> {
        let captures = TRACEPARENT_REGEX
            .captures(traceparent.trim())
            .ok_or_else(|| Error::extract("invalid traceparent", "traceparent"))?;

        let version = &captures[1];
        let trace_id = &captures[2];
        let parent_id = &captures[3];
        let flags = &captures[4];
        let tail = captures.get(5).map_or("", |m| m.as_str());

        let version = Self::extract_version(version, tail)?;

        if INVALID_SEGMENT_REGEX.is_match(trace_id) {
            return Err(Error::extract(
                "`0` value for trace_id is invalid",
                "traceparent",
            ));
        }
        if INVALID_SEGMENT_REGEX.is_match(parent_id) {
            return Err(Error::extract(
                "`0` value for parent_id is invalid",
                "traceparent",
            ));
        }

        let flags = u8::from_str_radix(flags, 16)
            .map_err(|_| Error::extract("Failed to decode trace flags", "traceparent"))?;

        Ok(Self {
            version,
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            flags,
        })
    }

    /// Parses the `traceparent` values of one request.
    ///
    /// A request carrying the header more than once has no usable parent.
    pub fn from_headers(values: &[&str]) -> Result<Self, Error> {
        match values {
            [single] => Self::parse(single),
            [] => Err(Error::extract("missing traceparent", "traceparent")),
            _ => Err(Error::extract("multiple traceparent headers", "traceparent")),
        }
    }

    fn extract_version(version: &str, tail: &str) -> Result<u8, Error> {
        match version {
            "ff" => Err(Error::extract(
                "`ff` is an invalid traceparent version",
                "traceparent",
            )),
            "00" if !tail.is_empty() => Err(Error::extract(
                "Traceparent with version `00` should contain only 4 values delimited by `-`",
                "traceparent",
            )),
            _ => u8::from_str_radix(version, 16)
                .map_err(|_| Error::extract("Failed to decode version", "traceparent")),
        }
    }

    #[must_use]
    pub fn sampled(&self) -> bool {
        self.flags & SAMPLED_FLAG == SAMPLED_FLAG
    }

    /// Serializes as a version `00` header value.
    #[must_use]
    pub fn encode(trace_id: &str, parent_id: &str, sampled: bool) -> String {
        format!(
            "00-{:0>32}-{}-{}",
            trace_id.to_lowercase(),
            parent_id,
            if sampled { "01" } else { "00" }
        )
    }
}
