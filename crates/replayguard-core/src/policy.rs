//! Policy snapshot plumbing shared by the diff and governance engines.
//!
//! A snapshot is the serialized effective configuration of a policy plus a
//! deterministic hash of that configuration. Snapshots are embedded in every
//! persisted scenario record so that verification can prove — not guess —
//! whether the policy in effect today matches the one the baseline was
//! approved under.

use serde::{Deserialize, Serialize};

use crate::canonical::ValueTree;
use crate::identity::digest_hex;

/// Hex length of a policy snapshot hash (full SHA-256).
pub const SNAPSHOT_HASH_LEN: usize = 64;

/// Serialized effective configuration of a policy, with its identity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Identifier of the policy this snapshot was taken from.
    pub policy_id: String,
    /// Comparison-semantics version, for policies that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantics_version: Option<u32>,
    /// Effective configuration as a canonical value tree.
    pub config: ValueTree,
    /// SHA-256 of the canonical serialization of the fields above.
    pub hash: String,
}

impl PolicySnapshot {
    /// Builds a snapshot, deriving the hash from the canonical compact JSON
    /// of `(policy_id, semantics_version, config)`.
    ///
    /// `config` must already be canonical (sorted keys); every policy type in
    /// this crate produces it that way.
    #[must_use]
    pub fn build(
        policy_id: impl Into<String>,
        semantics_version: Option<u32>,
        config: ValueTree,
    ) -> Self {
        let policy_id = policy_id.into();
        let mut payload = serde_json::Map::new();
        payload.insert("config".to_string(), config.clone());
        payload.insert(
            "policy_id".to_string(),
            ValueTree::String(policy_id.clone()),
        );
        if let Some(v) = semantics_version {
            payload.insert("semantics_version".to_string(), ValueTree::from(v));
        }
        let hash = digest_hex(
            ValueTree::Object(payload).to_string().as_bytes(),
            SNAPSHOT_HASH_LEN,
        );
        Self {
            policy_id,
            semantics_version,
            config,
            hash,
        }
    }
}
