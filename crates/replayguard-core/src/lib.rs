//! Behavioral-regression firewall core.
//!
//! This crate captures the observable behavior of functions as canonical,
//! content-addressed scenario records, and verifies later runs against those
//! approved baselines. It is built around one load-bearing property:
//! determinism. Canonicalization, identity hashing, diffing, and governance
//! decisions are pure functions that produce bit-identical results for
//! identical inputs, regardless of process, ordering, or repetition.
//!
//! # Pipeline
//!
//! ```text
//! value --canonicalize--> ValueTree --mask--> masked tree
//!       --semantic_id--> identity --capture--> ScenarioRecord (pending)
//!       --governance--> approved baseline
//!       --replay--> VerificationReport (exit code 0/1)
//! ```
//!
//! # Modules
//!
//! - [`canonical`]: deterministic value trees and PII masking
//! - [`identity`]: type-aware semantic identity hashing
//! - [`diff`]: policy-driven normalization and structured diffing
//! - [`governance`]: scenario lifecycle state machine with audit history
//! - [`record`]: persisted scenario records, validation, atomic storage
//! - [`capture`]: capture-side record construction
//! - [`replay`]: baseline-vs-current verification and reporting
//! - [`config`]: TOML policy configuration
//!
//! # Example
//!
//! ```
//! use replayguard_core::canonical::NoopMasker;
//! use replayguard_core::capture::{capture_record, CaptureOutcome};
//! use replayguard_core::diff::DiffPolicy;
//! use replayguard_core::governance::GovernancePolicy;
//! use replayguard_core::replay::verify;
//! use serde_json::json;
//!
//! let diff_policy = DiffPolicy::default();
//! let governance = GovernancePolicy::default();
//! let capture = |total: f64| {
//!     capture_record(
//!         "shop.pricing",
//!         "total",
//!         &json!({"sku": "SKU-001", "quantity": 1}),
//!         CaptureOutcome::Success(json!({"total": total})),
//!         &NoopMasker,
//!         &diff_policy,
//!         &governance,
//!     )
//!     .unwrap()
//! };
//!
//! let report = verify(&[capture(99.9)], &[capture(109.9)], &diff_policy, &governance).unwrap();
//! assert_eq!(report.exit_code, 1);
//! assert_eq!(report.scenarios[0].diff[0].path, "$.total");
//! ```

pub mod canonical;
pub mod capture;
pub mod config;
pub mod diff;
pub mod governance;
pub mod identity;
pub mod policy;
pub mod record;
pub mod replay;

/// Version of this engine, stamped into captures and reports.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use canonical::{canonicalize, CanonicalError, Canonicalize, Masker, ValueTree};
pub use capture::{capture_record, CaptureError, CaptureOutcome};
pub use config::{ConfigError, PolicyConfig};
pub use diff::{DiffEntry, DiffPolicy};
pub use governance::{GovernanceAction, GovernancePolicy, ScenarioStatus};
pub use identity::{semantic_id, ScenarioKey};
pub use record::{ScenarioRecord, ValidationError};
pub use replay::{verify, ReplayError, VerificationReport};
