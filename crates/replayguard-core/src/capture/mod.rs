//! Capture-side construction of scenario records.
//!
//! [`capture_record`] is the write path of the pipeline: serialize the
//! observed input, mask it, canonicalize it, derive the semantic id, and
//! assemble a `pending` [`ScenarioRecord`] stamped with the engine version
//! and the policy snapshots in force. Identity is always derived from the
//! masked tree, never from raw input.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::canonical::{canonicalize, canonicalize_tree, CanonicalError, Masker, ValueTree};
use crate::diff::DiffPolicy;
use crate::governance::GovernancePolicy;
use crate::identity::semantic_id;
use crate::record::{CaptureStatus, ScenarioRecord, ValidationError, FORMAT_VERSION};

/// Observed outcome of the captured call.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// The call returned this value.
    Success(ValueTree),
    /// The call raised.
    Failure {
        /// Error type name; participates in failure-equivalence comparison.
        error_type: String,
        /// Error message; stored for operators, excluded from comparison.
        message: String,
    },
}

/// Errors from record capture.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaptureError {
    /// The input or output could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// The assembled record violated the schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl CaptureError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Canonical(err) => err.code(),
            Self::Validation(err) => err.code(),
        }
    }
}

/// Captures one scenario as a `pending` record.
///
/// The input is masked before canonicalization and identity derivation, so
/// sensitive values never reach the persisted tree or the semantic id.
///
/// # Errors
///
/// Returns [`CaptureError::Canonical`] when the input or output cannot be
/// canonicalized (unserializable value, nesting past the depth bound) and
/// [`CaptureError::Validation`] if the assembled record violates the schema.
pub fn capture_record<T: Serialize + ?Sized>(
    module: &str,
    function: &str,
    input: &T,
    outcome: CaptureOutcome,
    masker: &dyn Masker,
    diff_policy: &DiffPolicy,
    governance_policy: &GovernancePolicy,
) -> Result<ScenarioRecord, CaptureError> {
    let raw = canonicalize(input)?;
    let masked = masker.mask(&raw)?;
    let input_tree = canonicalize_tree(&masked, 0)?;
    let semantic_id = semantic_id(&input_tree);
    debug!(module, function, semantic_id, "captured scenario input");

    let (status, output, error_type, error_message) = match outcome {
        CaptureOutcome::Success(value) => {
            let output = canonicalize_tree(&value, 0)?;
            (CaptureStatus::Success, Some(output), None, None)
        },
        CaptureOutcome::Failure {
            error_type,
            message,
        } => (CaptureStatus::Failure, None, Some(error_type), Some(message)),
    };

    let record = ScenarioRecord {
        format_version: FORMAT_VERSION,
        module: module.to_string(),
        function: function.to_string(),
        semantic_id,
        version_id: Uuid::new_v4().to_string(),
        scenario_status: crate::governance::ScenarioStatus::Pending,
        input: input_tree,
        output,
        status,
        error_type,
        error_message,
        engine_version: Some(crate::ENGINE_VERSION.to_string()),
        diff_policy_snapshot: Some(diff_policy.snapshot()),
        governance_policy_snapshot: Some(governance_policy.snapshot()),
        created_at: Utc::now(),
        approved_at: None,
        history: Vec::new(),
    };
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::canonical::{FieldMasker, NoopMasker, MASKED_SENSITIVE_KEY};
    use crate::governance::ScenarioStatus;
    use crate::identity::SEMANTIC_ID_LEN;

    fn capture(outcome: CaptureOutcome) -> ScenarioRecord {
        capture_record(
            "shop.pricing",
            "total",
            &json!({"sku": "SKU-001", "quantity": 1}),
            outcome,
            &NoopMasker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap()
    }

    // =========================================================================
    // Record assembly
    // =========================================================================

    #[test]
    fn success_captures_start_pending_with_full_metadata() {
        let rec = capture(CaptureOutcome::Success(json!({"total": 99.9})));
        assert_eq!(rec.scenario_status, ScenarioStatus::Pending);
        assert_eq!(rec.semantic_id.len(), SEMANTIC_ID_LEN);
        assert_eq!(rec.engine_version.as_deref(), Some(crate::ENGINE_VERSION));
        assert!(rec.diff_policy_snapshot.is_some());
        assert!(rec.governance_policy_snapshot.is_some());
        assert!(rec.approved_at.is_none());
        assert!(rec.history.is_empty());
    }

    #[test]
    fn failure_captures_store_type_and_message() {
        let rec = capture(CaptureOutcome::Failure {
            error_type: "ValueError".to_string(),
            message: "quantity must be positive".to_string(),
        });
        assert_eq!(rec.status, CaptureStatus::Failure);
        assert!(rec.output.is_none());
        assert_eq!(rec.error_type.as_deref(), Some("ValueError"));
        assert_eq!(
            rec.error_message.as_deref(),
            Some("quantity must be positive")
        );
    }

    // =========================================================================
    // Identity and masking
    // =========================================================================

    #[test]
    fn identical_inputs_resolve_to_the_same_id() {
        let a = capture(CaptureOutcome::Success(json!({"total": 1})));
        let b = capture(CaptureOutcome::Success(json!({"total": 2})));
        // Output never participates in identity.
        assert_eq!(a.semantic_id, b.semantic_id);
        assert_ne!(a.version_id, b.version_id);
    }

    #[test]
    fn identity_is_derived_from_the_masked_tree() {
        let masker = FieldMasker::default();
        let rec = capture_record(
            "auth",
            "login",
            &json!({"user": "ada", "password": "hunter2"}),
            CaptureOutcome::Success(json!(true)),
            &masker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap();
        assert_eq!(rec.input["password"], json!(MASKED_SENSITIVE_KEY));

        let other = capture_record(
            "auth",
            "login",
            &json!({"user": "ada", "password": "different"}),
            CaptureOutcome::Success(json!(true)),
            &masker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap();
        // Masked secrets cannot split identity.
        assert_eq!(rec.semantic_id, other.semantic_id);
    }
}
