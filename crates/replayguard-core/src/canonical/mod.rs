//! Canonical value trees for deterministic capture and comparison.
//!
//! Every value that enters the regression pipeline — call inputs, call
//! outputs, policy configurations — is first converted into a [`ValueTree`]:
//! a JSON-safe tree whose map keys are sorted lexicographically at every
//! nesting level, recursively, including inside lists. Two semantically
//! equal inputs always canonicalize to structurally identical trees,
//! independent of the producer's map iteration order.
//!
//! # Conversion priority
//!
//! 1. Anything implementing `serde::Serialize` (primitives, collections,
//!    derived structs) goes through [`canonicalize`].
//! 2. Types that need to control their own captured shape implement the
//!    [`Canonicalize`] capability trait and go through
//!    [`canonicalize_custom`].
//! 3. Introspectable named fields without a `Serialize` impl are encoded
//!    with [`canonical_class`] as `{"__class__": name, ...fields}`.
//! 4. Everything else falls back to [`canonical_opaque`], which embeds a
//!    display representation. That representation may differ across runs;
//!    callers that need stable identity must use path 1 or 2.
//!
//! # Depth bound
//!
//! Traversal depth is capped at [`MAX_DEPTH`]. Exceeding the cap fails with
//! [`CanonicalError::DepthExceeded`] instead of recursing unboundedly, which
//! protects the pipeline against pathological or cyclic payloads.
//!
//! # Example
//!
//! ```
//! use replayguard_core::canonical::canonicalize;
//! use serde_json::json;
//!
//! let tree = canonicalize(&json!({"z": 1, "a": {"y": 2, "x": 3}})).unwrap();
//! assert_eq!(
//!     serde_json::to_string(&tree).unwrap(),
//!     r#"{"a":{"x":3,"y":2},"z":1}"#
//! );
//! ```

mod mask;

pub use mask::{FieldMasker, MaskPattern, Masker, NoopMasker, MASKED_SENSITIVE_KEY};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Canonical representation of any captured value.
///
/// `serde_json::Value` with the default `BTreeMap`-backed object type, so
/// object keys are held in sorted order by construction.
pub type ValueTree = Value;

/// Maximum recursion depth for canonicalization and masking.
pub const MAX_DEPTH: usize = 100;

/// Errors that can occur while converting a value into canonical form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// The value is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: value nested deeper than {max_depth} levels")]
    DepthExceeded {
        /// The depth cap that was exceeded.
        max_depth: usize,
    },

    /// The value could not be serialized into a JSON-safe tree.
    #[error("unserializable value: {message}")]
    Unserializable {
        /// Description of the serialization failure.
        message: String,
    },
}

impl CanonicalError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "DEPTH_EXCEEDED",
            Self::Unserializable { .. } => "UNSERIALIZABLE",
        }
    }
}

/// Capability trait for types that control their own canonical form.
///
/// Detected via capability check rather than type inspection: a value either
/// implements the hook or it does not. The returned tree is re-canonicalized,
/// so implementations do not need to sort their own keys.
pub trait Canonicalize {
    /// Converts `self` into a canonical value tree.
    fn to_canonical_form(&self) -> Result<ValueTree, CanonicalError>;
}

/// Canonicalizes any serializable value.
///
/// # Errors
///
/// Returns [`CanonicalError::Unserializable`] if serde serialization fails
/// (for example a map with non-string keys), or
/// [`CanonicalError::DepthExceeded`] for pathological nesting.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<ValueTree, CanonicalError> {
    let raw = serde_json::to_value(value).map_err(|e| CanonicalError::Unserializable {
        message: e.to_string(),
    })?;
    canonicalize_tree(&raw, 0)
}

/// Canonicalizes a value through its [`Canonicalize`] hook.
///
/// # Errors
///
/// Propagates hook failures and depth violations.
pub fn canonicalize_custom(value: &dyn Canonicalize) -> Result<ValueTree, CanonicalError> {
    let raw = value.to_canonical_form()?;
    canonicalize_tree(&raw, 0)
}

/// Rebuilds a raw JSON value as a canonical tree, enforcing the depth bound.
///
/// Lists canonicalize element-wise preserving order; maps canonicalize with
/// keys in sorted order at every level.
///
/// # Errors
///
/// Returns [`CanonicalError::DepthExceeded`] when `depth` exceeds
/// [`MAX_DEPTH`].
pub fn canonicalize_tree(value: &Value, depth: usize) -> Result<ValueTree, CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::DepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(value.clone()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(canonicalize_tree(item, depth + 1)?);
            }
            Ok(Value::Array(out))
        },
        Value::Object(fields) => {
            // The default serde_json Map is BTreeMap-backed, so inserting
            // re-establishes sorted key order even for trees built with a
            // preserve-order producer.
            let mut out = Map::new();
            for (key, child) in fields {
                out.insert(key.clone(), canonicalize_tree(child, depth + 1)?);
            }
            Ok(Value::Object(out))
        },
    }
}

/// Encodes a named type with introspectable fields (priority path 3).
///
/// Produces `{"__class__": type_name, ...sorted canonicalized fields}`.
///
/// # Errors
///
/// Propagates depth violations from field canonicalization.
pub fn canonical_class(
    type_name: &str,
    fields: impl IntoIterator<Item = (String, Value)>,
) -> Result<ValueTree, CanonicalError> {
    let mut out = Map::new();
    out.insert(
        "__class__".to_string(),
        Value::String(type_name.to_string()),
    );
    for (key, value) in fields {
        out.insert(key, canonicalize_tree(&value, 1)?);
    }
    Ok(Value::Object(out))
}

/// Encodes a value with no better representation (priority path 4).
///
/// Produces `{"__class__": type_name, "__repr__": repr}`. The representation
/// is allowed to be non-deterministic across runs; values that need stable
/// identity must implement [`Canonicalize`] instead.
#[must_use]
pub fn canonical_opaque(type_name: &str, repr: &str) -> ValueTree {
    let mut out = Map::new();
    out.insert(
        "__class__".to_string(),
        Value::String(type_name.to_string()),
    );
    out.insert("__repr__".to_string(), Value::String(repr.to_string()));
    Value::Object(out)
}

/// Human-readable dynamic type name of a canonical value.
#[must_use]
pub const fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
