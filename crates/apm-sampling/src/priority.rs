// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace priority helpers.
//!
//! Priorities are `f32` values in `[0, 1)` when freshly generated and are
//! boosted by [`SAMPLED_PRIORITY_BOOST`] when a trace is sampled locally, so a
//! sampled trace always outranks an unsampled one inside a reservoir.

use rand::Rng;

/// Added to the priority of a trace when this process decides to sample it.
pub const SAMPLED_PRIORITY_BOOST: f32 = 1.0;

const PRIORITY_DECIMALS: i32 = 6;

/// Generates a new random priority in `[0, 1)` with six decimal digits.
pub fn new_priority() -> f32 {
    let raw: f64 = rand::thread_rng().gen();
    truncate(raw) as f32
}

/// Returns `priority` raised by `adjustment`, rounded to six decimals.
pub fn adjust(priority: f32, adjustment: f32) -> f32 {
    let scale = 10f64.powi(PRIORITY_DECIMALS);
    ((f64::from(priority) + f64::from(adjustment)) * scale).round() as f32 / scale as f32
}

fn truncate(value: f64) -> f64 {
    let scale = 10f64.powi(PRIORITY_DECIMALS);
    (value * scale).trunc() / scale
}

/// Formats a priority with at most six fractional digits and no trailing zeros.
///
/// `1.5` becomes `"1.5"`, `0.1234567` becomes `"0.123457"`, `2.0` becomes `"2"`.
pub fn format_priority(priority: f32) -> String {
    let formatted = format!("{:.6}", priority);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
