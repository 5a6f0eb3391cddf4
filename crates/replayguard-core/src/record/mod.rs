//! Persisted scenario records and schema validation.
//!
//! A [`ScenarioRecord`] is the unit of persistence: one captured
//! `(module, function, input)` scenario with its canonical trees, semantic
//! identity, lifecycle state, policy snapshots, and append-only governance
//! history. Required-field validation runs on every load; a malformed record
//! fails fast with a [`ValidationError`] rather than being silently coerced.
//! Missing *legacy metadata* (policy snapshots, engine version) is tolerated
//! on load and surfaced as advisory [`LoadWarning`]s instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canonical::ValueTree;
use crate::governance::{AuditEntry, ScenarioStatus};
use crate::identity::ScenarioKey;
use crate::policy::PolicySnapshot;

pub mod store;

pub use store::{load_dir, load_record, save_record, write_atomic, DirLoad, StoreError};

/// Current on-disk record format version.
pub const FORMAT_VERSION: u32 = 1;

/// Outcome class of the captured call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// The call returned a value.
    Success,
    /// The call raised; the error type participates in comparison, the
    /// message does not.
    Failure,
}

/// One persisted scenario: identity, canonical trees, lifecycle, and audit
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    /// On-disk format version.
    pub format_version: u32,
    /// Module of the captured function.
    pub module: String,
    /// Name of the captured function.
    pub function: String,
    /// Content-derived identity of the masked canonical input.
    pub semantic_id: String,
    /// Rotates on every approval.
    pub version_id: String,
    /// Lifecycle state, mutated only through governance transitions.
    pub scenario_status: ScenarioStatus,
    /// Masked canonical input tree.
    pub input: ValueTree,
    /// Canonical output tree; present iff `status` is success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ValueTree>,
    /// Success or failure of the captured call.
    pub status: CaptureStatus,
    /// Error type name for failure captures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error message for failure captures. Stored for operators; excluded
    /// from comparison semantics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Version of the engine that captured this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    /// Diff policy in force at capture/approval time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_policy_snapshot: Option<PolicySnapshot>,
    /// Governance policy in force at capture/approval time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_policy_snapshot: Option<PolicySnapshot>,
    /// When the scenario was first captured.
    pub created_at: DateTime<Utc>,
    /// Set on approval; cleared never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    /// Append-only governance history.
    #[serde(default)]
    pub history: Vec<AuditEntry>,
}

/// Advisory warning from a lenient record load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// Field the warning concerns.
    pub field: String,
    /// What was missing or assumed.
    pub message: String,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Schema violation in a scenario record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("VALIDATION:BASELINE_VALIDATION_ERROR field '{field}': expected {expected}, got {actual}")]
pub struct ValidationError {
    /// The offending field.
    pub field: String,
    /// Expected type or constraint.
    pub expected: String,
    /// What was actually found.
    pub actual: String,
}

impl ValidationError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        "BASELINE_VALIDATION_ERROR"
    }

    fn new(field: &str, expected: &str, actual: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }
}

impl ScenarioRecord {
    /// Identity key of this record.
    #[must_use]
    pub fn key(&self) -> ScenarioKey {
        ScenarioKey::new(&self.module, &self.function, &self.semantic_id)
    }

    /// Decodes a record from a JSON value, tolerating missing legacy
    /// metadata.
    ///
    /// Records written before policy snapshots and engine versioning existed
    /// load with advisory [`LoadWarning`]s and synthesized defaults; records
    /// with missing or mistyped *required* fields fail fast.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the offending field when a
    /// required field is absent, mistyped, or violates a semantic invariant.
    pub fn from_value(value: Value) -> Result<(Self, Vec<LoadWarning>), ValidationError> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::new(
                "$",
                "object",
                crate::canonical::value_type_name(&value),
            ));
        };
        let mut warnings = Vec::new();

        // Legacy records predate these fields; synthesize and warn rather
        // than reject.
        if !fields.contains_key("format_version") {
            warnings.push(LoadWarning {
                field: "format_version".to_string(),
                message: format!("missing; assuming version {FORMAT_VERSION}"),
            });
            fields.insert("format_version".to_string(), Value::from(FORMAT_VERSION));
        }
        if !fields.contains_key("version_id") {
            warnings.push(LoadWarning {
                field: "version_id".to_string(),
                message: "missing; record predates versioning".to_string(),
            });
            fields.insert("version_id".to_string(), Value::from(""));
        }
        if !fields.contains_key("scenario_status") {
            warnings.push(LoadWarning {
                field: "scenario_status".to_string(),
                message: "missing; assuming pending".to_string(),
            });
            fields.insert("scenario_status".to_string(), Value::from("pending"));
        }
        for snapshot in ["diff_policy_snapshot", "governance_policy_snapshot"] {
            if !fields.contains_key(snapshot) {
                warnings.push(LoadWarning {
                    field: snapshot.to_string(),
                    message: "missing; policy drift cannot be detected for this record"
                        .to_string(),
                });
            }
        }
        if !fields.contains_key("engine_version") {
            warnings.push(LoadWarning {
                field: "engine_version".to_string(),
                message: "missing; engine compatibility cannot be checked".to_string(),
            });
        }

        let record: Self =
            serde_json::from_value(Value::Object(fields)).map_err(|err| ValidationError {
                field: field_from_serde_error(&err),
                expected: "a well-formed scenario record".to_string(),
                actual: err.to_string(),
            })?;
        record.validate()?;
        Ok((record, warnings))
    }

    /// Enforces required-field and semantic invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first violated field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.format_version > FORMAT_VERSION {
            return Err(ValidationError::new(
                "format_version",
                &format!("<= {FORMAT_VERSION}"),
                self.format_version.to_string(),
            ));
        }
        for (field, value) in [
            ("module", &self.module),
            ("function", &self.function),
            ("semantic_id", &self.semantic_id),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::new(field, "non-empty string", "empty string"));
            }
        }
        match self.status {
            CaptureStatus::Success => {
                if self.output.is_none() {
                    return Err(ValidationError::new(
                        "output",
                        "present for success captures",
                        "absent",
                    ));
                }
            },
            CaptureStatus::Failure => {
                if self.error_type.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::new(
                        "error_type",
                        "present for failure captures",
                        "absent",
                    ));
                }
            },
        }
        Ok(())
    }
}

/// Best-effort field name out of a serde decode error message.
fn field_from_serde_error(err: &serde_json::Error) -> String {
    let text = err.to_string();
    text.split('`')
        .nth(1)
        .map_or_else(|| "$".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capture::{capture_record, CaptureOutcome};
    use crate::canonical::NoopMasker;
    use crate::diff::DiffPolicy;
    use crate::governance::GovernancePolicy;

    fn record() -> ScenarioRecord {
        capture_record(
            "shop.pricing",
            "total",
            &json!({"sku": "SKU-001", "quantity": 1}),
            CaptureOutcome::Success(json!({"total": 99.9})),
            &NoopMasker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn captured_records_validate() {
        record().validate().unwrap();
    }

    #[test]
    fn empty_identity_fields_are_rejected() {
        let mut rec = record();
        rec.module = "  ".to_string();
        let err = rec.validate().unwrap_err();
        assert_eq!(err.field, "module");
        assert_eq!(err.code(), "BASELINE_VALIDATION_ERROR");
        assert!(err.to_string().starts_with("VALIDATION:BASELINE_VALIDATION_ERROR"));
    }

    #[test]
    fn success_requires_output() {
        let mut rec = record();
        rec.output = None;
        assert_eq!(rec.validate().unwrap_err().field, "output");
    }

    #[test]
    fn failure_requires_error_type() {
        let mut rec = record();
        rec.status = CaptureStatus::Failure;
        rec.output = None;
        rec.error_type = Some("ValueError".to_string());
        rec.validate().unwrap();

        rec.error_type = None;
        assert_eq!(rec.validate().unwrap_err().field, "error_type");
    }

    #[test]
    fn future_format_versions_are_rejected() {
        let mut rec = record();
        rec.format_version = FORMAT_VERSION + 1;
        assert_eq!(rec.validate().unwrap_err().field, "format_version");
    }

    // =========================================================================
    // Lenient decode
    // =========================================================================

    #[test]
    fn round_trips_through_json_without_warnings_for_metadata() {
        let rec = record();
        let value = serde_json::to_value(&rec).unwrap();
        let (loaded, warnings) = ScenarioRecord::from_value(value).unwrap();
        assert_eq!(loaded, rec);
        assert!(warnings.is_empty());
    }

    #[test]
    fn legacy_records_load_with_warnings() {
        let legacy = json!({
            "module": "shop.pricing",
            "function": "total",
            "semantic_id": "a".repeat(32),
            "input": {"sku": "SKU-001"},
            "output": {"total": 99.9},
            "status": "success",
            "created_at": "2025-01-01T00:00:00Z",
        });
        let (loaded, warnings) = ScenarioRecord::from_value(legacy).unwrap();
        assert_eq!(loaded.format_version, FORMAT_VERSION);
        assert_eq!(loaded.scenario_status, ScenarioStatus::Pending);
        assert!(loaded.diff_policy_snapshot.is_none());
        let warned: Vec<_> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert!(warned.contains(&"version_id"));
        assert!(warned.contains(&"engine_version"));
        assert!(warned.contains(&"diff_policy_snapshot"));
    }

    #[test]
    fn missing_required_fields_fail_fast() {
        let malformed = json!({"module": "shop.pricing"});
        assert!(ScenarioRecord::from_value(malformed).is_err());
    }

    #[test]
    fn non_object_payloads_fail_with_type_name() {
        let err = ScenarioRecord::from_value(json!([1, 2])).unwrap_err();
        assert_eq!(err.field, "$");
        assert_eq!(err.actual, "array");
    }
}
