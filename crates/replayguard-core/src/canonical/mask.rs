//! Masking collaborator boundary.
//!
//! Masking runs on a canonical tree *before* identity hashing and before
//! persistence, so neither a semantic id nor a stored record is ever derived
//! from raw sensitive data. The core depends only on the [`Masker`] contract;
//! the detection catalog (which keys and patterns count as sensitive) is
//! supplied by the host.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{CanonicalError, ValueTree, MAX_DEPTH};

/// Replacement for values stored under a sensitive key.
pub const MASKED_SENSITIVE_KEY: &str = "[MASKED_SENSITIVE_KEY]";

/// Strings longer than this are not scanned by masking patterns. Regex
/// scanning of very large strings dominates capture latency, and payloads of
/// this size are not identity material in practice.
const MAX_SCANNED_STRING_LEN: usize = 10_000;

/// Key names treated as sensitive when no catalog is supplied.
static DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "auth",
    "key",
    "credential",
];

static DEFAULT_PATTERNS: LazyLock<Vec<MaskPattern>> = LazyLock::new(|| {
    [
        ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        ("ipv4", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
    ]
    .iter()
    .filter_map(|(label, pattern)| MaskPattern::new(label, pattern))
    .collect()
});

/// Applies redaction to a canonical tree.
///
/// Implementations must be depth-bounded and recursion-safe, with the same
/// traversal contract as canonicalization: exceeding [`MAX_DEPTH`] fails with
/// [`CanonicalError::DepthExceeded`] rather than recursing further.
pub trait Masker {
    /// Returns a masked copy of `tree`. The input is never mutated.
    fn mask(&self, tree: &ValueTree) -> Result<ValueTree, CanonicalError>;
}

/// Masker for hosts that redact upstream of the core.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMasker;

impl Masker for NoopMasker {
    fn mask(&self, tree: &ValueTree) -> Result<ValueTree, CanonicalError> {
        Ok(tree.clone())
    }
}

/// A labeled redaction pattern applied to string leaves.
#[derive(Debug, Clone)]
pub struct MaskPattern {
    label: String,
    regex: Regex,
    replacement: String,
}

impl MaskPattern {
    /// Compiles a labeled pattern. Returns `None` (with a warning) when the
    /// pattern does not compile, so one bad catalog entry never disables
    /// masking as a whole.
    #[must_use]
    pub fn new(label: &str, pattern: &str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(regex) => Some(Self {
                label: label.to_ascii_lowercase(),
                replacement: format!("[MASKED_{}]", label.to_ascii_uppercase()),
                regex,
            }),
            Err(e) => {
                warn!(label, error = %e, "invalid mask pattern skipped");
                None
            },
        }
    }

    /// The lowercase label of this pattern.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Reference masker: sensitive-key redaction plus labeled string patterns.
///
/// Key matching is exact (case-insensitive) in strict mode, substring
/// otherwise. Values under a matched key are replaced wholesale with
/// [`MASKED_SENSITIVE_KEY`]; string leaves elsewhere are scanned with each
/// pattern and matches replaced with `[MASKED_<LABEL>]`.
#[derive(Debug, Clone)]
pub struct FieldMasker {
    sensitive_keys: Vec<String>,
    patterns: Vec<MaskPattern>,
    strict_key_matching: bool,
}

impl Default for FieldMasker {
    fn default() -> Self {
        Self {
            sensitive_keys: DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            patterns: DEFAULT_PATTERNS.clone(),
            strict_key_matching: true,
        }
    }
}

impl FieldMasker {
    /// Builds a masker from a host-supplied catalog. `extra_keys` extend the
    /// default sensitive key set; `patterns` replace the default patterns
    /// when non-empty.
    #[must_use]
    pub fn new(
        extra_keys: impl IntoIterator<Item = String>,
        patterns: Vec<MaskPattern>,
        strict_key_matching: bool,
    ) -> Self {
        let mut base = Self::default();
        base.sensitive_keys
            .extend(extra_keys.into_iter().map(|k| k.to_ascii_lowercase()));
        if !patterns.is_empty() {
            base.patterns = patterns;
        }
        base.strict_key_matching = strict_key_matching;
        base
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        if self.strict_key_matching {
            self.sensitive_keys.iter().any(|s| *s == key)
        } else {
            self.sensitive_keys.iter().any(|s| key.contains(s.as_str()))
        }
    }

    fn mask_string(&self, s: &str) -> Value {
        if s.len() > MAX_SCANNED_STRING_LEN {
            debug!(
                len = s.len(),
                cap = MAX_SCANNED_STRING_LEN,
                "string exceeds mask scan cap, left unscanned"
            );
            return Value::String(s.to_string());
        }
        let mut current = s.to_string();
        for pattern in &self.patterns {
            current = pattern
                .regex
                .replace_all(&current, pattern.replacement.as_str())
                .into_owned();
        }
        Value::String(current)
    }

    fn mask_at(&self, tree: &Value, depth: usize) -> Result<Value, CanonicalError> {
        if depth > MAX_DEPTH {
            return Err(CanonicalError::DepthExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        match tree {
            Value::String(s) => Ok(self.mask_string(s)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.mask_at(item, depth + 1)?);
                }
                Ok(Value::Array(out))
            },
            Value::Object(fields) => {
                let mut out = Map::new();
                for (key, child) in fields {
                    let masked = if self.is_sensitive_key(key) {
                        Value::String(MASKED_SENSITIVE_KEY.to_string())
                    } else {
                        self.mask_at(child, depth + 1)?
                    };
                    out.insert(key.clone(), masked);
                }
                Ok(Value::Object(out))
            },
            other => Ok(other.clone()),
        }
    }
}

impl Masker for FieldMasker {
    fn mask(&self, tree: &ValueTree) -> Result<ValueTree, CanonicalError> {
        self.mask_at(tree, 0)
    }
}
