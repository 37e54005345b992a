// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Carrier traits for trace context propagation.
//!
//! Carriers abstract over the transport metadata (HTTP headers, message
//! properties) that trace context travels in. Keys are case-insensitive to
//! tolerate header normalization.
//!
//! `tracestate` may legally arrive split across several header lines, so
//! [`Extractor::get_all`] exposes every value for a key in arrival order.

use std::collections::HashMap;

/// Writes trace context into a carrier.
pub trait Injector {
    /// Sets `key` to `value`, replacing any previous value.
    fn set(&mut self, key: &str, value: String);
}

/// Reads trace context from a carrier.
pub trait Extractor {
    /// Gets the first value for `key` (case-insensitive).
    fn get(&self, key: &str) -> Option<&str>;

    /// Gets every value for `key` (case-insensitive), in arrival order.
    fn get_all(&self, key: &str) -> Vec<&str> {
        self.get(key).into_iter().collect()
    }

    /// Gets all keys present in the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect::<Vec<_>>()
    }
}

/// Ordered header list, allowing repeated keys.
impl Injector for Vec<(String, String)> {
    fn set(&mut self, key: &str, value: String) {
        let key = key.to_lowercase();
        self.retain(|(k, _)| *k != key);
        self.push((key, value));
    }
}

impl Extractor for Vec<(String, String)> {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        self.iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::with_capacity(self.len());
        for (k, _) in self {
            if !keys.contains(&k.as_str()) {
                keys.push(k.as_str());
            }
        }
        keys
    }
}
