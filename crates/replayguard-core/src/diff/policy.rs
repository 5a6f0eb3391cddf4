//! Declarative, auditable diff policy.
//!
//! Field and path suppression must be explicit; no hidden filtering is
//! permitted. A policy is immutable per evaluation and identified by the
//! deterministic hash of its effective configuration, so a baseline can
//! record exactly which policy it was approved under.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::canonical::{CanonicalError, ValueTree, MAX_DEPTH};
use crate::policy::PolicySnapshot;

/// Current diff comparison semantics version.
pub const DIFF_SEMANTICS_VERSION: u32 = 1;

/// Configuration controlling which fields are ignored and how values are
/// normalized before comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiffPolicy {
    /// Identifier recorded in snapshots and reports.
    pub policy_id: String,
    /// Version of the comparison semantics this policy assumes.
    pub semantics_version: u32,
    /// Field names removed at any depth before comparison (case-insensitive).
    pub ignored_fields: BTreeSet<String>,
    /// `$.`-style path expressions removed before comparison.
    pub ignored_paths: BTreeSet<String>,
    /// Two numbers compare equal when their rounded forms match at this
    /// tolerance. Zero disables rounding.
    pub float_tolerance: f64,
    /// Replace ISO-8601-shaped timestamp strings with a sentinel.
    pub mask_timestamps: bool,
    /// Replace UUID-shaped strings with a sentinel.
    pub mask_uuid_like: bool,
    /// Collapse whitespace runs in string leaves.
    pub normalize_string_whitespace: bool,
    /// Paths whose list elements are sorted into a deterministic order
    /// before comparison.
    pub sort_list_paths: BTreeSet<String>,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self {
            policy_id: "default-v1".to_string(),
            semantics_version: DIFF_SEMANTICS_VERSION,
            ignored_fields: [
                "timestamp",
                "transaction_id",
                "id",
                "uuid",
                "duration",
                "created_at",
                "approved_at",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            ignored_paths: BTreeSet::new(),
            float_tolerance: 1e-6,
            mask_timestamps: true,
            mask_uuid_like: false,
            normalize_string_whitespace: true,
            sort_list_paths: BTreeSet::new(),
        }
    }
}

impl DiffPolicy {
    /// Serializable snapshot of the effective configuration, hashed for
    /// drift detection.
    #[must_use]
    pub fn snapshot(&self) -> PolicySnapshot {
        let config = json!({
            "float_tolerance": self.float_tolerance,
            "ignored_fields": self.ignored_fields,
            "ignored_paths": self.ignored_paths,
            "mask_timestamps": self.mask_timestamps,
            "mask_uuid_like": self.mask_uuid_like,
            "normalize_string_whitespace": self.normalize_string_whitespace,
            "sort_list_paths": self.sort_list_paths,
        });
        PolicySnapshot::build(
            self.policy_id.clone(),
            Some(self.semantics_version),
            config,
        )
    }

    fn ignores_field(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.ignored_fields.iter().any(|f| f.eq_ignore_ascii_case(&key))
    }

    fn ignores_path(&self, path: &str) -> bool {
        path_matches(path, &self.ignored_paths)
    }

    /// Whether list elements at `path` compare order-insensitively.
    #[must_use]
    pub fn sorts_list_at(&self, path: &str) -> bool {
        path_matches(path, &self.sort_list_paths)
    }
}

/// Matches a concrete `$.a.b[0]` path against configured expressions.
///
/// Expressions may be written with or without the `$.`/`$` prefix; all three
/// spellings address the same location.
pub(crate) fn path_matches(path: &str, exprs: &BTreeSet<String>) -> bool {
    if exprs.contains(path) {
        return true;
    }
    if let Some(stripped) = path.strip_prefix("$.") {
        if exprs.contains(stripped) {
            return true;
        }
    }
    if let Some(stripped) = path.strip_prefix('$') {
        if exprs.contains(stripped) {
            return true;
        }
    }
    false
}

/// Returns a copy of `tree` with fields and paths ignored by `policy`
/// removed at every depth.
///
/// Null-safe: a null tree passes through unchanged. The input is never
/// mutated.
///
/// # Errors
///
/// Returns [`CanonicalError::DepthExceeded`] for nesting past the
/// canonicalization bound.
pub fn apply_diff_policy(tree: &ValueTree, policy: &DiffPolicy) -> Result<ValueTree, CanonicalError> {
    if policy.ignores_path("$") {
        return Ok(Value::Null);
    }
    apply_at(tree, policy, "$", 0)
}

fn apply_at(
    tree: &Value,
    policy: &DiffPolicy,
    path: &str,
    depth: usize,
) -> Result<Value, CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::DepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }
    match tree {
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, child) in fields {
                let child_path = format!("{path}.{key}");
                if policy.ignores_field(key) || policy.ignores_path(&child_path) {
                    continue;
                }
                out.insert(key.clone(), apply_at(child, policy, &child_path, depth + 1)?);
            }
            Ok(Value::Object(out))
        },
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{index}]");
                if policy.ignores_path(&item_path) {
                    continue;
                }
                out.push(apply_at(item, policy, &item_path, depth + 1)?);
            }
            Ok(Value::Array(out))
        },
        other => Ok(other.clone()),
    }
}
