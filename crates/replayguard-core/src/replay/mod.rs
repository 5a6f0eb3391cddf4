//! Replay verification: baseline set against current captures.
//!
//! [`verify`] pairs the two record sets by scenario key and classifies each
//! pair. Deprecated baselines are excluded from active comparison but kept in
//! the report; unmatched baselines fail as missing captures; unmatched
//! currents are reported as new behavior, not mismatches. Policy drift
//! (snapshot hash or semantics version) fails the scenario before any
//! diffing; engine-version skew and missing legacy metadata are advisory
//! warnings only.
//!
//! Failure equivalence: two failure captures with the same `error_type`
//! pass regardless of message text. A mismatched `error_type`, or a
//! success/failure flip, is always a hard mismatch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::canonical::CanonicalError;
use crate::diff::{
    apply_diff_policy, build_structured_diff, normalize_for_compare, summarize_changes,
    ChangeType, DiffEntry, DiffError, DiffPolicy, Severity,
};
use crate::governance::{GovernancePolicy, ScenarioStatus};
use crate::record::{CaptureStatus, ScenarioRecord};

/// Failure code for a baseline with no matching current capture.
pub const MISSING_CAPTURE: &str = "MISSING_CAPTURE";

/// Failure code for a policy snapshot hash mismatch.
pub const POLICY_DRIFT: &str = "POLICY_DRIFT";

/// Failure code for a baseline approved under older comparison semantics.
pub const SEMANTICS_DRIFT: &str = "SEMANTICS_DRIFT";

/// Classification of one scenario row in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// Behavior matches the baseline.
    Pass,
    /// Behavioral mismatch or drift.
    Fail,
    /// Deprecated baseline, excluded from active comparison.
    Skipped,
    /// Current capture with no baseline; unapproved new behavior.
    New,
}

/// One scenario's verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// `module.function:semantic_id` key.
    pub scenario_id: String,
    /// Pass/fail classification.
    pub status: RowStatus,
    /// One-line human summary.
    pub diff_summary: String,
    /// Structured change set; empty for non-diff failures.
    pub diff: Vec<DiffEntry>,
    /// Baseline `version_id`, when a baseline participated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_version: Option<String>,
    /// Stable code for non-diff failures (`MISSING_CAPTURE`,
    /// `POLICY_DRIFT`, `SEMANTICS_DRIFT`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
}

/// Run-level counters for a verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// When verification ran.
    pub timestamp: DateTime<Utc>,
    /// Engine version performing the run.
    pub engine_version: String,
    /// Number of baseline records considered.
    pub baseline_count: usize,
    /// Number of current captures considered.
    pub capture_count: usize,
    /// Number of scenarios classified as `Fail`.
    pub mismatch_count: usize,
}

/// Machine-readable verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Run-level counters.
    pub summary: RunSummary,
    /// Per-scenario rows, ordered by scenario key.
    pub scenarios: Vec<ScenarioReport>,
    /// Advisory warnings (engine skew, missing legacy metadata).
    pub warnings: Vec<String>,
    /// `0` when no mismatches, `1` otherwise.
    pub exit_code: i32,
}

/// Errors that abort a verification run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplayError {
    /// Two records in one set claim the same scenario identity.
    #[error("duplicate scenario key '{key}' in the {set} set")]
    DuplicateKey {
        /// The duplicated key.
        key: String,
        /// Which set contained it (`baseline` or `current`).
        set: &'static str,
    },

    /// A tree could not be prepared for comparison.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// Diffing failed.
    #[error(transparent)]
    Diff(#[from] DiffError),
}

impl ReplayError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "DUPLICATE_SCENARIO",
            Self::Canonical(err) => err.code(),
            Self::Diff(err) => err.code(),
        }
    }

    /// Process exit code for run-aborting errors.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        2
    }
}

/// Verifies current captures against a baseline set.
///
/// # Errors
///
/// Returns [`ReplayError::DuplicateKey`] when either set contains two
/// records with the same scenario key, and propagates canonicalization or
/// diff failures. All other divergence is reported, not raised.
pub fn verify(
    baselines: &[ScenarioRecord],
    currents: &[ScenarioRecord],
    diff_policy: &DiffPolicy,
    governance_policy: &GovernancePolicy,
) -> Result<VerificationReport, ReplayError> {
    let baseline_index = index_by_key(baselines, "baseline")?;
    let current_index = index_by_key(currents, "current")?;

    let effective_diff = diff_policy.snapshot();
    let effective_governance = governance_policy.snapshot();

    let mut warnings = Vec::new();
    let mut scenarios = Vec::new();

    for (key, baseline) in &baseline_index {
        if baseline.scenario_status == ScenarioStatus::Deprecated {
            scenarios.push(ScenarioReport {
                scenario_id: key.clone(),
                status: RowStatus::Skipped,
                diff_summary: "Deprecated baseline; excluded from active comparison.".to_string(),
                diff: Vec::new(),
                baseline_version: Some(baseline.version_id.clone()),
                failure_code: None,
            });
            continue;
        }

        collect_metadata_warnings(key, baseline, &mut warnings);

        if let Some(row) = drift_failure(key, baseline, &effective_diff, &effective_governance) {
            scenarios.push(row);
            continue;
        }

        let Some(current) = current_index.get(key) else {
            scenarios.push(ScenarioReport {
                scenario_id: key.clone(),
                status: RowStatus::Fail,
                diff_summary: "Baseline has no matching current capture.".to_string(),
                diff: Vec::new(),
                baseline_version: Some(baseline.version_id.clone()),
                failure_code: Some(MISSING_CAPTURE.to_string()),
            });
            continue;
        };

        scenarios.push(compare_pair(key, baseline, current, diff_policy)?);
    }

    for key in current_index.keys() {
        if !baseline_index.contains_key(key) {
            scenarios.push(ScenarioReport {
                scenario_id: key.clone(),
                status: RowStatus::New,
                diff_summary: "New scenario; no approved baseline exists yet.".to_string(),
                diff: Vec::new(),
                baseline_version: None,
                failure_code: None,
            });
        }
    }

    scenarios.sort_by(|a, b| a.scenario_id.cmp(&b.scenario_id));
    let mismatch_count = scenarios
        .iter()
        .filter(|row| row.status == RowStatus::Fail)
        .count();
    let exit_code = i32::from(mismatch_count > 0);
    info!(
        baselines = baselines.len(),
        captures = currents.len(),
        mismatches = mismatch_count,
        "verification run complete"
    );

    Ok(VerificationReport {
        summary: RunSummary {
            timestamp: Utc::now(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            baseline_count: baselines.len(),
            capture_count: currents.len(),
            mismatch_count,
        },
        scenarios,
        warnings,
        exit_code,
    })
}

fn index_by_key<'a>(
    records: &'a [ScenarioRecord],
    set: &'static str,
) -> Result<BTreeMap<String, &'a ScenarioRecord>, ReplayError> {
    let mut index = BTreeMap::new();
    for record in records {
        let key = record.key().to_string();
        if index.insert(key.clone(), record).is_some() {
            return Err(ReplayError::DuplicateKey { key, set });
        }
    }
    Ok(index)
}

fn collect_metadata_warnings(key: &str, baseline: &ScenarioRecord, warnings: &mut Vec<String>) {
    match baseline.engine_version.as_deref() {
        None => warnings.push(format!(
            "{key}: baseline has no recorded engine version; compatibility unknown"
        )),
        Some(version) if version != crate::ENGINE_VERSION => warnings.push(format!(
            "{key}: baseline captured by engine {version}, verifying with {}",
            crate::ENGINE_VERSION
        )),
        Some(_) => {},
    }
    if baseline.diff_policy_snapshot.is_none() {
        warnings.push(format!(
            "{key}: baseline has no diff policy snapshot; drift cannot be detected"
        ));
    }
    if baseline.governance_policy_snapshot.is_none() {
        warnings.push(format!(
            "{key}: baseline has no governance policy snapshot; drift cannot be detected"
        ));
    }
}

/// Policy compatibility checks, evaluated before any diffing.
fn drift_failure(
    key: &str,
    baseline: &ScenarioRecord,
    effective_diff: &crate::policy::PolicySnapshot,
    effective_governance: &crate::policy::PolicySnapshot,
) -> Option<ScenarioReport> {
    let fail = |code: &str, summary: String| ScenarioReport {
        scenario_id: key.to_string(),
        status: RowStatus::Fail,
        diff_summary: summary,
        diff: Vec::new(),
        baseline_version: Some(baseline.version_id.clone()),
        failure_code: Some(code.to_string()),
    };

    if let Some(snapshot) = &baseline.diff_policy_snapshot {
        if let (Some(baseline_semantics), Some(current_semantics)) =
            (snapshot.semantics_version, effective_diff.semantics_version)
        {
            if baseline_semantics < current_semantics {
                return Some(fail(
                    SEMANTICS_DRIFT,
                    format!(
                        "Baseline approved under comparison semantics v{baseline_semantics}, \
                         current is v{current_semantics}; re-approval required."
                    ),
                ));
            }
        }
        if snapshot.hash != effective_diff.hash {
            return Some(fail(
                POLICY_DRIFT,
                format!(
                    "Diff policy changed since approval ({} -> {}).",
                    snapshot.policy_id, effective_diff.policy_id
                ),
            ));
        }
    }
    if let Some(snapshot) = &baseline.governance_policy_snapshot {
        if snapshot.hash != effective_governance.hash {
            return Some(fail(
                POLICY_DRIFT,
                format!(
                    "Governance policy changed since approval ({} -> {}).",
                    snapshot.policy_id, effective_governance.policy_id
                ),
            ));
        }
    }
    None
}

fn compare_pair(
    key: &str,
    baseline: &ScenarioRecord,
    current: &ScenarioRecord,
    diff_policy: &DiffPolicy,
) -> Result<ScenarioReport, ReplayError> {
    let row = |status: RowStatus, diff_summary: String, diff: Vec<DiffEntry>| ScenarioReport {
        scenario_id: key.to_string(),
        status,
        diff_summary,
        diff,
        baseline_version: Some(baseline.version_id.clone()),
        failure_code: None,
    };

    match (baseline.status, current.status) {
        (CaptureStatus::Failure, CaptureStatus::Failure) => {
            // Message text is unstable and never compared.
            if baseline.error_type == current.error_type {
                Ok(row(
                    RowStatus::Pass,
                    "Both captures fail with the same error type.".to_string(),
                    Vec::new(),
                ))
            } else {
                let entry = DiffEntry {
                    path: "$.error_type".to_string(),
                    change_type: ChangeType::ValueChanged,
                    severity: Severity::High,
                    baseline: option_value(baseline.error_type.as_deref()),
                    current: option_value(current.error_type.as_deref()),
                };
                let summary = summarize_changes(std::slice::from_ref(&entry));
                Ok(row(RowStatus::Fail, summary, vec![entry]))
            }
        },
        (baseline_status, current_status) if baseline_status != current_status => {
            let entry = DiffEntry {
                path: "$.status".to_string(),
                change_type: ChangeType::TypeChanged,
                severity: Severity::High,
                baseline: status_value(baseline_status),
                current: status_value(current_status),
            };
            let summary = summarize_changes(std::slice::from_ref(&entry));
            Ok(row(RowStatus::Fail, summary, vec![entry]))
        },
        _ => {
            let baseline_output = baseline.output.clone().unwrap_or(Value::Null);
            let current_output = current.output.clone().unwrap_or(Value::Null);
            let b = normalize_for_compare(
                &apply_diff_policy(&baseline_output, diff_policy)?,
                diff_policy,
            );
            let c = normalize_for_compare(
                &apply_diff_policy(&current_output, diff_policy)?,
                diff_policy,
            );
            let diff = build_structured_diff(&b, &c)?;
            let status = if diff.is_empty() {
                RowStatus::Pass
            } else {
                RowStatus::Fail
            };
            let summary = summarize_changes(&diff);
            Ok(row(status, summary, diff))
        },
    }
}

fn option_value(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn status_value(status: CaptureStatus) -> Value {
    match status {
        CaptureStatus::Success => Value::from("success"),
        CaptureStatus::Failure => Value::from("failure"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::capture::{capture_record, CaptureOutcome};
    use crate::canonical::NoopMasker;
    use crate::governance::{apply_transition, GovernanceAction};

    fn capture(quantity: u32, outcome: CaptureOutcome) -> ScenarioRecord {
        capture_record(
            "shop.pricing",
            "total",
            &json!({"sku": "SKU-001", "quantity": quantity}),
            outcome,
            &NoopMasker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap()
    }

    fn success(quantity: u32, total: f64) -> ScenarioRecord {
        capture(quantity, CaptureOutcome::Success(json!({"total": total})))
    }

    fn failure(quantity: u32, error_type: &str, message: &str) -> ScenarioRecord {
        capture(
            quantity,
            CaptureOutcome::Failure {
                error_type: error_type.to_string(),
                message: message.to_string(),
            },
        )
    }

    fn run(baselines: &[ScenarioRecord], currents: &[ScenarioRecord]) -> VerificationReport {
        verify(
            baselines,
            currents,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap()
    }

    // =========================================================================
    // Matching
    // =========================================================================

    #[test]
    fn matching_outputs_pass_with_exit_code_zero() {
        let report = run(&[success(1, 99.9)], &[success(1, 99.9)]);
        assert_eq!(report.summary.mismatch_count, 0);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.scenarios[0].status, RowStatus::Pass);
    }

    #[test]
    fn changed_output_is_a_single_value_changed_mismatch() {
        let report = run(&[success(1, 99.9)], &[success(1, 109.9)]);
        assert_eq!(report.summary.mismatch_count, 1);
        assert_eq!(report.exit_code, 1);
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::Fail);
        assert_eq!(row.diff.len(), 1);
        assert_eq!(row.diff[0].path, "$.total");
        assert_eq!(row.diff[0].change_type, ChangeType::ValueChanged);
    }

    #[test]
    fn unmatched_baseline_is_a_missing_capture_failure() {
        let report = run(&[success(1, 99.9)], &[]);
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::Fail);
        assert_eq!(row.failure_code.as_deref(), Some(MISSING_CAPTURE));
        assert_eq!(report.exit_code, 1);
    }

    #[test]
    fn unmatched_current_is_new_not_a_mismatch() {
        let report = run(&[], &[success(1, 99.9)]);
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::New);
        assert_eq!(report.summary.mismatch_count, 0);
        assert_eq!(report.exit_code, 0);
    }

    #[test]
    fn deprecated_baselines_are_skipped_but_visible() {
        let mut baseline = success(1, 99.9);
        apply_transition(
            &mut baseline,
            GovernanceAction::Deprecate,
            &GovernancePolicy::default(),
            &DiffPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        // A changed current against a deprecated baseline is not a mismatch.
        let report = run(&[baseline], &[success(1, 500.0)]);
        assert_eq!(report.scenarios[0].status, RowStatus::Skipped);
        assert_eq!(report.summary.mismatch_count, 0);
    }

    #[test]
    fn duplicate_keys_abort_the_run() {
        let baseline = success(1, 99.9);
        let err = verify(
            &[baseline.clone(), baseline],
            &[],
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReplayError::DuplicateKey { set: "baseline", .. }));
        assert_eq!(err.exit_code(), 2);
    }

    // =========================================================================
    // Failure equivalence
    // =========================================================================

    #[test]
    fn same_error_type_passes_regardless_of_message() {
        let baseline = failure(1, "ValueError", "old message");
        let current = failure(1, "ValueError", "completely different message");
        let report = run(&[baseline], &[current]);
        assert_eq!(report.scenarios[0].status, RowStatus::Pass);
    }

    #[test]
    fn different_error_type_is_a_hard_mismatch() {
        let report = run(&[failure(1, "ValueError", "m")], &[failure(1, "KeyError", "m")]);
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::Fail);
        assert_eq!(row.diff[0].path, "$.error_type");
        assert_eq!(row.diff[0].severity, Severity::High);
    }

    #[test]
    fn status_flip_is_a_hard_mismatch() {
        let report = run(&[success(1, 99.9)], &[failure(1, "ValueError", "boom")]);
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::Fail);
        assert_eq!(row.diff[0].path, "$.status");
        assert_eq!(row.diff[0].change_type, ChangeType::TypeChanged);
    }

    // =========================================================================
    // Version and policy compatibility
    // =========================================================================

    #[test]
    fn engine_version_skew_warns_without_failing() {
        let mut baseline = success(1, 99.9);
        baseline.engine_version = Some("0.0.1".to_string());
        let report = run(&[baseline], &[success(1, 99.9)]);
        assert_eq!(report.scenarios[0].status, RowStatus::Pass);
        assert!(report.warnings.iter().any(|w| w.contains("engine 0.0.1")));
    }

    #[test]
    fn missing_legacy_metadata_warns_without_failing() {
        let mut baseline = success(1, 99.9);
        baseline.engine_version = None;
        baseline.diff_policy_snapshot = None;
        baseline.governance_policy_snapshot = None;
        let report = run(&[baseline], &[success(1, 99.9)]);
        assert_eq!(report.scenarios[0].status, RowStatus::Pass);
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn diff_policy_drift_fails_the_scenario() {
        let baseline = success(1, 99.9);
        let mut drifted = DiffPolicy::default();
        drifted.sort_list_paths.insert("$.items".to_string());
        let report = verify(
            &[baseline],
            &[success(1, 99.9)],
            &drifted,
            &GovernancePolicy::default(),
        )
        .unwrap();
        let row = &report.scenarios[0];
        assert_eq!(row.status, RowStatus::Fail);
        assert_eq!(row.failure_code.as_deref(), Some(POLICY_DRIFT));
        assert!(row.diff.is_empty());
    }

    #[test]
    fn governance_policy_drift_fails_the_scenario() {
        let baseline = success(1, 99.9);
        let mut drifted = GovernancePolicy::default();
        drifted
            .transitions
            .remove(&(GovernanceAction::Deprecate, ScenarioStatus::Pending));
        let report = verify(
            &[baseline],
            &[success(1, 99.9)],
            &DiffPolicy::default(),
            &drifted,
        )
        .unwrap();
        assert_eq!(
            report.scenarios[0].failure_code.as_deref(),
            Some(POLICY_DRIFT)
        );
    }

    #[test]
    fn semantics_regression_is_reported_as_drift() {
        let mut baseline = success(1, 99.9);
        if let Some(snapshot) = &mut baseline.diff_policy_snapshot {
            snapshot.semantics_version = Some(0);
        }
        let report = run(&[baseline], &[success(1, 99.9)]);
        assert_eq!(
            report.scenarios[0].failure_code.as_deref(),
            Some(SEMANTICS_DRIFT)
        );
    }

    // =========================================================================
    // Report shape
    // =========================================================================

    #[test]
    fn rows_are_ordered_by_scenario_key() {
        let report = run(
            &[success(2, 10.0), success(1, 20.0)],
            &[success(2, 10.0), success(1, 20.0)],
        );
        let ids: Vec<&str> = report
            .scenarios
            .iter()
            .map(|r| r.scenario_id.as_str())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(report.summary.baseline_count, 2);
        assert_eq!(report.summary.capture_count, 2);
    }

    #[test]
    fn report_serializes_to_stable_json_fields() {
        let report = run(&[success(1, 99.9)], &[success(1, 109.9)]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["exit_code"], json!(1));
        assert_eq!(value["summary"]["mismatch_count"], json!(1));
        assert_eq!(value["scenarios"][0]["status"], json!("fail"));
        assert_eq!(
            value["scenarios"][0]["diff"][0]["change_type"],
            json!("value_changed")
        );
    }
}
