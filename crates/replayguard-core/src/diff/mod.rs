//! Policy-driven structured diffing.
//!
//! Comparison runs in two explicit phases, both null-safe and both pure:
//!
//! 1. [`apply_diff_policy`] removes fields and paths the policy declares
//!    non-semantic, on a copy of the input.
//! 2. [`normalize_for_compare`] rewrites the remainder into a deterministic
//!    comparison form (sorted keys, rounded floats, masked timestamps,
//!    order-insensitive lists where declared).
//!
//! [`build_structured_diff`] then walks the two normalized trees in
//! lock-step and emits a severity-ranked change set.
//!
//! # Example
//!
//! ```
//! use replayguard_core::diff::{
//!     apply_diff_policy, build_structured_diff, normalize_for_compare, ChangeType, DiffPolicy,
//! };
//! use serde_json::json;
//!
//! let policy = DiffPolicy::default();
//! let baseline = normalize_for_compare(
//!     &apply_diff_policy(&json!({"total": 99.9}), &policy).unwrap(),
//!     &policy,
//! );
//! let current = normalize_for_compare(
//!     &apply_diff_policy(&json!({"total": 109.9}), &policy).unwrap(),
//!     &policy,
//! );
//! let changes = build_structured_diff(&baseline, &current).unwrap();
//! assert_eq!(changes[0].change_type, ChangeType::ValueChanged);
//! assert_eq!(changes[0].path, "$.total");
//! ```

mod normalize;
mod policy;
mod structured;

pub use normalize::{normalize_for_compare, TIMESTAMP_SENTINEL, UUID_SENTINEL};
pub use policy::{apply_diff_policy, DiffPolicy, DIFF_SEMANTICS_VERSION};
pub use structured::{
    build_structured_diff, format_human_diff, summarize_changes, ChangeType, DiffEntry, DiffError,
    Severity, MAX_DIFF_DEPTH,
};
