//! Policy configuration loading.
//!
//! The config collaborator supplies the effective [`DiffPolicy`] and
//! [`GovernancePolicy`] to a verification run. Precedence between file- and
//! environment-sourced values is resolved by the host; this module only
//! parses TOML and resolves governance policy names.
//!
//! ```toml
//! governance_policy = "default"
//!
//! [diff]
//! policy_id = "checkout-v2"
//! float_tolerance = 0.001
//! ignored_fields = ["timestamp", "request_id"]
//! sort_list_paths = ["$.items"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::DiffPolicy;
use crate::governance::{resolve_governance_policy, GovernanceError, GovernancePolicy};

/// Top-level policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Effective diff policy.
    pub diff: DiffPolicy,

    /// Name of the governance policy to resolve.
    pub governance_policy: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            diff: DiffPolicy::default(),
            governance_policy: "default".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading a configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The named governance policy is not registered.
    #[error("configuration validation failed: {0}")]
    UnknownPolicy(#[from] GovernanceError),
}

impl ConfigError {
    /// Process exit code for configuration failures.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        2
    }
}

impl PolicyConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or contains unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolves the configured governance policy name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPolicy`] for unregistered names.
    pub fn governance_policy(&self) -> Result<GovernancePolicy, ConfigError> {
        Ok(resolve_governance_policy(&self.governance_policy)?)
    }
}
