//! Scenario lifecycle governance.
//!
//! Governance is policy-driven data: a [`GovernancePolicy`] is a serializable
//! map from `(action, current status)` to an allow/deny rule, and
//! [`evaluate`] is a pure function of that map. Any pair absent from the
//! policy is rejected fail-fast with reason code `INVALID_TRANSITION` —
//! never silently treated as allowed.
//!
//! # Lifecycle
//!
//! ```text
//! pending --approve--> approved --approve--> approved   (rotates version_id)
//! pending --deprecate--> deprecated
//! approved --deprecate--> deprecated
//! deprecated --deprecate--> deprecated                  (no-op, still audited)
//! ```
//!
//! `deprecated` is terminal for forward transitions except its own no-op.
//! Every applied transition appends an immutable [`AuditEntry`] to the
//! scenario's history; history is never rewritten, only appended.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::diff::DiffPolicy;
use crate::identity::digest_hex;
use crate::policy::PolicySnapshot;
use crate::record::ScenarioRecord;

/// Hex length of a governance decision id.
pub const DECISION_ID_LEN: usize = 12;

/// Reason code returned for `(action, status)` pairs absent from the policy.
pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";

/// Lifecycle state of a scenario record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    /// Captured but not yet reviewed. Initial state on first capture.
    #[default]
    Pending,
    /// Reviewed and part of the active baseline.
    Approved,
    /// Retired from active replay scope; retained, never deleted.
    Deprecated,
}

impl ScenarioStatus {
    /// Lowercase name as persisted in records.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Deprecated => "deprecated",
        }
    }

    /// Parses the persisted lowercase name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Governance action requested against a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceAction {
    /// Promote to the active baseline (or re-approve, rotating the version).
    Approve,
    /// Retire from active replay scope.
    Deprecate,
}

impl GovernanceAction {
    /// Lowercase name as recorded in audit history.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deprecate => "deprecate",
        }
    }

    /// The status this action transitions into when allowed.
    #[must_use]
    pub const fn target_status(self) -> ScenarioStatus {
        match self {
            Self::Approve => ScenarioStatus::Approved,
            Self::Deprecate => ScenarioStatus::Deprecated,
        }
    }
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Allow/deny rule for one `(action, status)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Whether the transition is permitted.
    pub allowed: bool,
    /// Stable reason code for audit and reporting.
    pub reason_code: String,
    /// Human-readable explanation.
    pub message: String,
}

impl TransitionRule {
    fn allow(reason_code: &str, message: &str) -> Self {
        Self {
            allowed: true,
            reason_code: reason_code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Serializable governance policy with deterministic transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernancePolicy {
    /// Identifier recorded in snapshots and decisions.
    pub policy_id: String,
    /// Legal transitions; anything absent is rejected.
    pub transitions: BTreeMap<(GovernanceAction, ScenarioStatus), TransitionRule>,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        use GovernanceAction::{Approve, Deprecate};
        use ScenarioStatus::{Approved, Deprecated, Pending};

        let transitions = BTreeMap::from([
            (
                (Approve, Pending),
                TransitionRule::allow("APPROVE_ALLOWED", "Pending scenario approved and versioned."),
            ),
            (
                (Approve, Approved),
                TransitionRule::allow(
                    "REAPPROVE_ALLOWED",
                    "Approved scenario updated with a new version.",
                ),
            ),
            (
                (Deprecate, Approved),
                TransitionRule::allow("DEPRECATE_ALLOWED", "Approved scenario marked as deprecated."),
            ),
            (
                (Deprecate, Pending),
                TransitionRule::allow(
                    "DEPRECATE_PENDING_ALLOWED",
                    "Pending scenario marked as deprecated.",
                ),
            ),
            (
                (Deprecate, Deprecated),
                TransitionRule::allow(
                    "NOOP_DEPRECATE",
                    "Scenario already deprecated; action logged for audit.",
                ),
            ),
        ]);
        Self {
            policy_id: "default-governance-v1".to_string(),
            transitions,
        }
    }
}

impl GovernancePolicy {
    /// Serializable snapshot of the transition table, hashed for drift
    /// detection.
    #[must_use]
    pub fn snapshot(&self) -> PolicySnapshot {
        let transitions: Vec<_> = self
            .transitions
            .iter()
            .map(|((action, from), rule)| {
                json!({
                    "action": action.name(),
                    "allowed": rule.allowed,
                    "from": from.name(),
                    "message": rule.message,
                    "reason_code": rule.reason_code,
                })
            })
            .collect();
        PolicySnapshot::build(
            self.policy_id.clone(),
            None,
            json!({ "transitions": transitions }),
        )
    }
}

/// Auditable decision for one requested transition.
///
/// A pure function of `(action, current status, policy)`; carries policy and
/// decision identifiers for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the transition may be applied.
    pub allowed: bool,
    /// Policy that produced this decision.
    pub policy_id: String,
    /// Deterministic id of this `(policy, action, status)` evaluation.
    pub decision_id: String,
    /// Stable reason code.
    pub reason_code: String,
    /// Human-readable explanation.
    pub message: String,
}

/// One governance action recorded in a scenario's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Status before the transition.
    pub previous_status: ScenarioStatus,
    /// Status after the transition.
    pub new_status: ScenarioStatus,
    /// Action that was applied.
    pub action: GovernanceAction,
    /// Decision id of the evaluation that allowed it.
    pub decision_id: String,
    /// When the transition was applied.
    pub timestamp: DateTime<Utc>,
}

/// Errors from governance operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GovernanceError {
    /// The requested transition was denied by policy. State is untouched.
    #[error("transition denied [{reason_code}]: {message}")]
    TransitionDenied {
        /// Reason code from the decision (`INVALID_TRANSITION` for pairs
        /// absent from the policy).
        reason_code: String,
        /// Explanation from the decision.
        message: String,
    },

    /// No governance policy is registered under the requested name.
    #[error("unsupported governance policy: {name}")]
    UnknownPolicy {
        /// The unresolvable policy name.
        name: String,
    },
}

impl GovernanceError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TransitionDenied { .. } => "INVALID_TRANSITION",
            Self::UnknownPolicy { .. } => "GOVERNANCE_POLICY",
        }
    }
}

/// Resolves a named governance policy.
///
/// # Errors
///
/// Returns [`GovernanceError::UnknownPolicy`] for unregistered names.
pub fn resolve_governance_policy(name: &str) -> Result<GovernancePolicy, GovernanceError> {
    match name.to_ascii_lowercase().as_str() {
        "default" | "default-v1" | "default-governance-v1" => Ok(GovernancePolicy::default()),
        other => Err(GovernanceError::UnknownPolicy {
            name: other.to_string(),
        }),
    }
}

fn decision_id(policy_id: &str, action: GovernanceAction, status: ScenarioStatus) -> String {
    digest_hex(
        format!("{policy_id}:{action}:{status}").as_bytes(),
        DECISION_ID_LEN,
    )
}

/// Evaluates a requested transition against a policy.
///
/// Pure: the same `(action, status, policy)` always yields the same
/// [`Decision`]. Pairs absent from the policy map are rejected with
/// [`INVALID_TRANSITION`].
#[must_use]
pub fn evaluate(
    action: GovernanceAction,
    status: ScenarioStatus,
    policy: &GovernancePolicy,
) -> Decision {
    let decision_id = decision_id(&policy.policy_id, action, status);
    match policy.transitions.get(&(action, status)) {
        Some(rule) => Decision {
            allowed: rule.allowed,
            policy_id: policy.policy_id.clone(),
            decision_id,
            reason_code: rule.reason_code.clone(),
            message: rule.message.clone(),
        },
        None => Decision {
            allowed: false,
            policy_id: policy.policy_id.clone(),
            decision_id,
            reason_code: INVALID_TRANSITION.to_string(),
            message: format!("No transition declared for action '{action}' from status '{status}'."),
        },
    }
}

/// Applies a governance action to a record.
///
/// Denied decisions are rejected before any mutation. On success the record's
/// status is updated and an [`AuditEntry`] appended; `approve` additionally
/// rotates `version_id`, sets `approved_at`, and refreshes both policy
/// snapshots so the record reflects the policies it was approved under.
///
/// # Errors
///
/// Returns [`GovernanceError::TransitionDenied`] when the policy denies the
/// pair or declares no rule for it.
pub fn apply_transition(
    record: &mut ScenarioRecord,
    action: GovernanceAction,
    policy: &GovernancePolicy,
    diff_policy: &DiffPolicy,
    now: DateTime<Utc>,
) -> Result<Decision, GovernanceError> {
    let decision = evaluate(action, record.scenario_status, policy);
    if !decision.allowed {
        return Err(GovernanceError::TransitionDenied {
            reason_code: decision.reason_code,
            message: decision.message,
        });
    }

    let previous = record.scenario_status;
    let new_status = action.target_status();
    record.scenario_status = new_status;
    record.history.push(AuditEntry {
        previous_status: previous,
        new_status,
        action,
        decision_id: decision.decision_id.clone(),
        timestamp: now,
    });

    if action == GovernanceAction::Approve {
        record.version_id = Uuid::new_v4().to_string();
        record.approved_at = Some(now);
        record.diff_policy_snapshot = Some(diff_policy.snapshot());
        record.governance_policy_snapshot = Some(policy.snapshot());
    }

    Ok(decision)
}
