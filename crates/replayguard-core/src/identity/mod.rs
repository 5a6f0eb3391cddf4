//! Deterministic scenario identity.
//!
//! A scenario's identity is a hash of its masked, canonicalized input — never
//! of raw data, and never of whichever concrete call happened to be captured
//! first. Identical masked inputs always resolve to the same id across
//! processes and time.
//!
//! # Type-prefixed encoding
//!
//! Every primitive leaf is encoded with an explicit type prefix before
//! hashing (`1` becomes `int:1`, `"1"` becomes `str:1`), so values that are
//! equal under loose comparison but distinct in type never collide. The
//! prefixed tree is serialized to compact sorted-key JSON and hashed with
//! SHA-256; the first 32 hex characters form the `semantic_id`.
//!
//! ```
//! use replayguard_core::identity::semantic_id;
//! use serde_json::json;
//!
//! assert_ne!(semantic_id(&json!({"x": 1})), semantic_id(&json!({"x": "1"})));
//! assert_eq!(semantic_id(&json!({"a": 1, "b": 2})), semantic_id(&json!({"b": 2, "a": 1})));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::ValueTree;

/// Length of a semantic id in hex characters.
pub const SEMANTIC_ID_LEN: usize = 32;

/// Computes the semantic id of a masked, canonical input tree.
#[must_use]
pub fn semantic_id(masked_input: &ValueTree) -> String {
    let prefixed = type_prefixed(masked_input);
    // The default serde_json Map keeps keys sorted, so this serialization is
    // the deterministic sorted-key form.
    let encoded = prefixed.to_string();
    let digest = Sha256::digest(encoded.as_bytes());
    let mut hex = hex_encode(&digest);
    hex.truncate(SEMANTIC_ID_LEN);
    hex
}

/// Rewrites primitive leaves as type-prefixed strings.
///
/// Containers keep their shape; only leaves change, which preserves the
/// structural component of identity while making leaf types explicit.
fn type_prefixed(tree: &Value) -> Value {
    match tree {
        Value::Null => Value::String("null:null".to_string()),
        Value::Bool(b) => Value::String(format!("bool:{b}")),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Value::String(format!("int:{n}"))
            } else {
                Value::String(format!("float:{n}"))
            }
        },
        Value::String(s) => Value::String(format!("str:{s}")),
        Value::Array(items) => Value::Array(items.iter().map(type_prefixed).collect()),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, child) in fields {
                out.insert(key.clone(), type_prefixed(child));
            }
            Value::Object(out)
        },
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Truncated hex digest of an arbitrary canonical payload.
///
/// Used for policy snapshot hashes and governance decision ids.
#[must_use]
pub fn digest_hex(payload: &[u8], len: usize) -> String {
    let digest = Sha256::digest(payload);
    let mut hex = hex_encode(&digest);
    hex.truncate(len.min(hex.len()));
    hex
}

/// Immutable identity of one regression test case.
///
/// Two calls with identical masked, canonicalized input always produce the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScenarioKey {
    /// Module of the recorded function.
    pub module: String,
    /// Name of the recorded function.
    pub function: String,
    /// Semantic id of the masked canonical input.
    pub semantic_id: String,
}

impl ScenarioKey {
    /// Builds a key from its parts.
    #[must_use]
    pub fn new(module: impl Into<String>, function: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            semantic_id: id.into(),
        }
    }

    /// Parses the `"{module}.{function}:{semantic_id}"` string form.
    ///
    /// The function name is the last dot-separated segment before the colon;
    /// everything before it is the module path.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (func_path, semantic_id) = s.rsplit_once(':')?;
        let (module, function) = func_path.rsplit_once('.')?;
        if module.is_empty() || function.is_empty() || semantic_id.is_empty() {
            return None;
        }
        Some(Self::new(module, function, semantic_id))
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.module, self.function, self.semantic_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // =========================================================================
    // Determinism and collision resistance
    // =========================================================================

    #[test]
    fn id_is_stable_across_repeated_calls() {
        let tree = json!({"product_id": "SKU-001", "quantity": 1});
        assert_eq!(semantic_id(&tree), semantic_id(&tree));
    }

    #[test]
    fn id_ignores_source_key_order() {
        assert_eq!(
            semantic_id(&json!({"a": 1, "b": [true, null]})),
            semantic_id(&json!({"b": [true, null], "a": 1})),
        );
    }

    #[test]
    fn type_distinct_values_never_collide() {
        assert_ne!(semantic_id(&json!({"x": 1})), semantic_id(&json!({"x": "1"})));
        assert_ne!(
            semantic_id(&json!({"x": true})),
            semantic_id(&json!({"x": "true"}))
        );
        assert_ne!(
            semantic_id(&json!({"x": null})),
            semantic_id(&json!({"x": "null"}))
        );
        assert_ne!(
            semantic_id(&json!({"x": 1.0})),
            semantic_id(&json!({"x": "1.0"}))
        );
    }

    #[test]
    fn id_has_fixed_length() {
        assert_eq!(semantic_id(&json!(null)).len(), SEMANTIC_ID_LEN);
        assert_eq!(semantic_id(&json!({"deep": [[[1]]]})).len(), SEMANTIC_ID_LEN);
    }

    #[test]
    fn masked_inputs_share_identity_regardless_of_raw_value() {
        // Two different raw emails masked to the same sentinel produce the
        // same id: identity is purely a function of the masked tree.
        let a = json!({"email": "[MASKED_EMAIL]", "qty": 2});
        let b = json!({"qty": 2, "email": "[MASKED_EMAIL]"});
        assert_eq!(semantic_id(&a), semantic_id(&b));
    }

    // =========================================================================
    // ScenarioKey
    // =========================================================================

    #[test]
    fn key_string_form_round_trips() {
        let key = ScenarioKey::new("shop.pricing", "total", "ab12");
        let shown = key.to_string();
        assert_eq!(shown, "shop.pricing.total:ab12");
        assert_eq!(ScenarioKey::parse(&shown).unwrap(), key);
    }

    #[test]
    fn key_parse_rejects_malformed_forms() {
        assert!(ScenarioKey::parse("no-colon").is_none());
        assert!(ScenarioKey::parse("nodot:abc").is_none());
        assert!(ScenarioKey::parse("m.f:").is_none());
        assert!(ScenarioKey::parse(".f:abc").is_none());
    }

    #[test]
    fn digest_hex_truncates_to_requested_length() {
        assert_eq!(digest_hex(b"payload", 12).len(), 12);
        assert_eq!(digest_hex(b"payload", 64).len(), 64);
        assert_eq!(digest_hex(b"payload", 12), digest_hex(b"payload", 64)[..12]);
    }
}
