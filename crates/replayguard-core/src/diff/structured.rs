//! Structured, path-aware diffing of normalized value trees.
//!
//! Both sides are walked in lock-step by path. Every divergence is emitted
//! as a [`DiffEntry`] with a change type and a severity, so a verification
//! report can sort findings by risk instead of by position.
//!
//! Severity assignment: structural changes (`type_changed`, `removed`) are
//! high; `value_changed` and `length_changed` are medium; `added` keys are
//! low — new optional output is the least alarming divergence.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canonical::{value_type_name, ValueTree};

/// Depth cap for diff traversal, separate from the canonicalization bound so
/// that already-canonical trees of legal depth always diff successfully.
pub const MAX_DIFF_DEPTH: usize = 1000;

static LIST_INDEX_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+\]$").expect("invalid index suffix pattern"));

/// Errors from structured diffing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiffError {
    /// The trees are nested deeper than [`MAX_DIFF_DEPTH`] levels.
    #[error("max diff depth exceeded at {path}")]
    DepthExceeded {
        /// Path at which traversal stopped.
        path: String,
    },
}

impl DiffError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "DIFF_DEPTH_EXCEEDED",
        }
    }
}

/// Kind of a single behavioral divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A key exists only on the current side.
    Added,
    /// A key exists only on the baseline side.
    Removed,
    /// Types match but values differ after normalization.
    ValueChanged,
    /// The dynamic type of the value differs.
    TypeChanged,
    /// Two lists differ in element count.
    LengthChanged,
}

impl ChangeType {
    /// Snake-case name used in summaries and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::ValueChanged => "value_changed",
            Self::TypeChanged => "type_changed",
            Self::LengthChanged => "length_changed",
        }
    }

    /// Risk severity of this change type.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::TypeChanged | Self::Removed => Severity::High,
            Self::ValueChanged | Self::LengthChanged => Severity::Medium,
            Self::Added => Severity::Low,
        }
    }
}

/// Risk level of a change. Ordered so that sorting ascending puts the
/// riskiest entries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Structural divergence.
    High,
    /// Content divergence.
    Medium,
    /// Additive divergence.
    Low,
}

impl Severity {
    /// Lowercase name used in summaries and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// One entry in a structured diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// `$.`-style path of the divergence.
    pub path: String,
    /// Kind of divergence.
    pub change_type: ChangeType,
    /// Risk severity.
    pub severity: Severity,
    /// Baseline-side snapshot (null when absent).
    pub baseline: ValueTree,
    /// Current-side snapshot (null when absent).
    pub current: ValueTree,
}

impl DiffEntry {
    fn new(path: &str, change_type: ChangeType, baseline: ValueTree, current: ValueTree) -> Self {
        Self {
            path: path.to_string(),
            change_type,
            severity: change_type.severity(),
            baseline,
            current,
        }
    }
}

/// Walks two normalized trees and emits every divergence, ordered by path.
///
/// Null-safe: null participates as an ordinary value and surfaces as
/// `type_changed` against non-null data; this function never panics on
/// absent input.
///
/// # Errors
///
/// Returns [`DiffError::DepthExceeded`] for nesting past
/// [`MAX_DIFF_DEPTH`].
pub fn build_structured_diff(
    baseline: &ValueTree,
    current: &ValueTree,
) -> Result<Vec<DiffEntry>, DiffError> {
    let mut changes = Vec::new();
    diff_at(baseline, current, "$", 0, &mut changes)?;
    Ok(changes)
}

fn diff_at(
    baseline: &Value,
    current: &Value,
    path: &str,
    depth: usize,
    changes: &mut Vec<DiffEntry>,
) -> Result<(), DiffError> {
    if depth > MAX_DIFF_DEPTH {
        return Err(DiffError::DepthExceeded {
            path: path.to_string(),
        });
    }

    if value_type_name(baseline) != value_type_name(current) {
        changes.push(DiffEntry::new(
            path,
            ChangeType::TypeChanged,
            baseline.clone(),
            current.clone(),
        ));
        return Ok(());
    }

    match (baseline, current) {
        (Value::Object(b), Value::Object(c)) => {
            // BTreeMap-backed maps iterate in key order, so emission order is
            // deterministic: removed, added, then common keys, each sorted.
            for (key, value) in b {
                if !c.contains_key(key) {
                    changes.push(DiffEntry::new(
                        &format!("{path}.{key}"),
                        ChangeType::Removed,
                        value.clone(),
                        Value::Null,
                    ));
                }
            }
            for (key, value) in c {
                if !b.contains_key(key) {
                    changes.push(DiffEntry::new(
                        &format!("{path}.{key}"),
                        ChangeType::Added,
                        Value::Null,
                        value.clone(),
                    ));
                }
            }
            for (key, b_value) in b {
                if let Some(c_value) = c.get(key) {
                    diff_at(b_value, c_value, &format!("{path}.{key}"), depth + 1, changes)?;
                }
            }
            Ok(())
        },
        (Value::Array(b), Value::Array(c)) => {
            // Positional-prefix comparison; order-insensitive collections are
            // handled upstream by normalization's sort_list_paths.
            for (index, (b_item, c_item)) in b.iter().zip(c.iter()).enumerate() {
                diff_at(b_item, c_item, &format!("{path}[{index}]"), depth + 1, changes)?;
            }
            if b.len() != c.len() {
                changes.push(DiffEntry::new(
                    path,
                    ChangeType::LengthChanged,
                    Value::from(b.len()),
                    Value::from(c.len()),
                ));
            }
            Ok(())
        },
        _ => {
            if baseline != current {
                changes.push(DiffEntry::new(
                    path,
                    ChangeType::ValueChanged,
                    baseline.clone(),
                    current.clone(),
                ));
            }
            Ok(())
        },
    }
}

/// Deterministic one-line summary of a change set.
#[must_use]
pub fn summarize_changes(changes: &[DiffEntry]) -> String {
    if changes.is_empty() {
        return "No semantic differences detected.".to_string();
    }

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_severity: BTreeMap<&str, usize> = BTreeMap::new();
    for change in changes {
        *by_type.entry(change.change_type.name()).or_default() += 1;
        *by_severity.entry(change.severity.name()).or_default() += 1;
    }

    let type_text = by_type
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    let severity_text = by_severity
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    let top_paths = changes
        .iter()
        .take(3)
        .map(|c| c.path.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Detected {} difference(s): {type_text}; severity: {severity_text}. Most impacted paths: {top_paths}.",
        changes.len(),
    )
}

/// Concise human-readable rendering of a change set.
///
/// When every changed value on one side reappears on the other, the values
/// are identical and only their order differs; the rendering then appends a
/// hint suggesting a `sort_list_paths` policy entry for the affected parent
/// paths.
#[must_use]
pub fn format_human_diff(changes: &[DiffEntry]) -> String {
    if changes.is_empty() {
        return "No differences.".to_string();
    }

    let mut out = String::new();
    for change in changes {
        if !out.is_empty() {
            out.push('\n');
        }
        let severity = change.severity.name();
        let path = &change.path;
        let _ = match change.change_type {
            ChangeType::ValueChanged => write!(
                out,
                "~ [{severity}] {path}: {} -> {}",
                change.baseline, change.current
            ),
            ChangeType::TypeChanged => write!(
                out,
                "~ [{severity}] {path}: type {} -> {} ({} -> {})",
                value_type_name(&change.baseline),
                value_type_name(&change.current),
                change.baseline,
                change.current
            ),
            ChangeType::Added => write!(out, "+ [{severity}] {path}: {}", change.current),
            ChangeType::Removed => write!(out, "- [{severity}] {path}: {}", change.baseline),
            ChangeType::LengthChanged => write!(
                out,
                "~ [{severity}] {path}: length {} -> {}",
                change.baseline, change.current
            ),
        };
    }

    if let Some(hint) = reorder_hint(changes) {
        out.push('\n');
        out.push_str(&hint);
    }
    out
}

fn reorder_hint(changes: &[DiffEntry]) -> Option<String> {
    let value_changed: Vec<&DiffEntry> = changes
        .iter()
        .filter(|c| c.change_type == ChangeType::ValueChanged)
        .collect();
    if value_changed.is_empty() {
        return None;
    }

    let baseline_values: BTreeSet<String> =
        value_changed.iter().map(|c| c.baseline.to_string()).collect();
    let current_values: BTreeSet<String> =
        value_changed.iter().map(|c| c.current.to_string()).collect();
    if baseline_values != current_values {
        return None;
    }

    let mut parents: Vec<String> = Vec::new();
    for change in &value_changed {
        let parent = LIST_INDEX_SUFFIX_RE.replace(&change.path, "").into_owned();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }
    let sort_hint = parents
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!(
        "\nHint: values are identical but order differs; this may be non-deterministic ordering.\n\
         If order does not matter, add the paths to the diff policy:\n  sort_list_paths = [{sort_hint}]\n\
         If order matters, check the producer for unordered collections, \
         unordered queries, or parallel task completion."
    ))
}
