//! Pre-comparison normalization.
//!
//! Normalization removes representation noise that does not constitute a
//! behavior change: map key order, float representation below the configured
//! tolerance, timestamp and UUID churn, whitespace runs, and list order at
//! paths the policy declares order-insensitive. It is idempotent:
//! normalizing an already-normalized tree is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::policy::DiffPolicy;
use crate::canonical::ValueTree;

/// Sentinel replacing ISO-8601-shaped timestamps when `mask_timestamps` is
/// set.
pub const TIMESTAMP_SENTINEL: &str = "<timestamp>";

/// Sentinel replacing UUID-shaped strings when `mask_uuid_like` is set.
pub const UUID_SENTINEL: &str = "<uuid>";

static ISO_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})$")
        .expect("invalid timestamp pattern")
});

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .expect("invalid uuid pattern")
});

/// Normalizes a tree into its deterministic comparison form under `policy`.
///
/// Null-safe: null in, null out. The input is never mutated.
#[must_use]
pub fn normalize_for_compare(tree: &ValueTree, policy: &DiffPolicy) -> ValueTree {
    normalize_at(tree, policy, "$")
}

fn normalize_at(tree: &Value, policy: &DiffPolicy, path: &str) -> Value {
    match tree {
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, child) in fields {
                let child_path = format!("{path}.{key}");
                out.insert(key.clone(), normalize_at(child, policy, &child_path));
            }
            Value::Object(out)
        },
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(index, item)| normalize_at(item, policy, &format!("{path}[{index}]")))
                .collect();
            if policy.sorts_list_at(path) {
                // Stable sort on the compact canonical serialization of each
                // (already normalized) element. Nested maps serialize with
                // sorted keys, so the ordering key is deterministic.
                let mut keyed: Vec<(String, Value)> =
                    out.drain(..).map(|v| (v.to_string(), v)).collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                out = keyed.into_iter().map(|(_, v)| v).collect();
            }
            Value::Array(out)
        },
        Value::Number(n) => Value::Number(round_number(n, policy.float_tolerance)),
        Value::String(s) => Value::String(normalize_string(s, policy)),
        other => other.clone(),
    }
}

/// Rounds a float leaf to the precision implied by the tolerance. Integers
/// and a zero tolerance pass through untouched.
fn round_number(n: &Number, tolerance: f64) -> Number {
    if n.is_i64() || n.is_u64() || tolerance <= 0.0 {
        return n.clone();
    }
    let Some(value) = n.as_f64() else {
        return n.clone();
    };
    let decimals = decimals_for_tolerance(tolerance);
    let factor = 10f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    Number::from_f64(rounded).unwrap_or_else(|| n.clone())
}

/// Number of decimal places implied by a tolerance, clamped to `0..=12`.
#[allow(clippy::cast_possible_truncation)]
fn decimals_for_tolerance(tolerance: f64) -> i32 {
    (-tolerance.log10()).round().clamp(0.0, 12.0) as i32
}

fn normalize_string(s: &str, policy: &DiffPolicy) -> String {
    let mut out = if policy.normalize_string_whitespace {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        s.to_string()
    };
    if policy.mask_timestamps && ISO_TIMESTAMP_RE.is_match(&out) {
        // Shape match plus a real parse, so look-alikes such as month 13
        // stay untouched.
        if chrono::DateTime::parse_from_rfc3339(&out).is_ok() {
            out = TIMESTAMP_SENTINEL.to_string();
        }
    }
    if policy.mask_uuid_like && UUID_RE.is_match(&out) {
        out = UUID_SENTINEL.to_string();
    }
    out
}
