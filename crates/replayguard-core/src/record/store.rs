//! Crash-safe JSON persistence for scenario records.
//!
//! Writes go through [`write_atomic`]: the payload lands in a temp file in
//! the destination directory, is flushed and fsynced, then renamed over the
//! target. Readers therefore observe either the old record or the new one,
//! never a torn write.
//!
//! Directory loads are resilient per file: a malformed record is collected
//! as a failure and skipped, so one bad file cannot take down a replay run.
//! Duplicate scenario keys are the exception — two records claiming the same
//! identity make the run non-deterministic, so they abort the load.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::{LoadWarning, ScenarioRecord, ValidationError};

/// Per-file size cap; anything larger is rejected before parsing.
pub const MAX_RECORD_BYTES: u64 = 10 * 1024 * 1024;

/// Persistence errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Filesystem failure.
    #[error("store I/O failure at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("malformed record at {path}: {source}")]
    Parse {
        /// The unreadable file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The file exceeds the per-record size cap.
    #[error("record at {path} is {size} bytes, over the {limit}-byte cap")]
    TooLarge {
        /// The oversized file.
        path: PathBuf,
        /// Observed size in bytes.
        size: u64,
        /// Configured cap.
        limit: u64,
    },

    /// The record violates the schema.
    #[error("invalid record at {path}: {source}")]
    Validation {
        /// The offending file.
        path: PathBuf,
        /// The schema violation.
        #[source]
        source: ValidationError,
    },

    /// Two records in one set claim the same scenario identity.
    #[error("duplicate scenario key '{key}' at {path}")]
    DuplicateKey {
        /// The duplicated `module.function:semantic_id` key.
        key: String,
        /// The second file claiming it.
        path: PathBuf,
    },
}

impl StoreError {
    /// Stable machine-matchable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "STORE_IO",
            Self::Parse { .. } => "BASELINE_FORMAT_ERROR",
            Self::TooLarge { .. } => "RECORD_TOO_LARGE",
            Self::Validation { .. } => "BASELINE_VALIDATION_ERROR",
            Self::DuplicateKey { .. } => "DUPLICATE_SCENARIO",
        }
    }
}

/// Result of loading a record directory.
#[derive(Debug, Default)]
pub struct DirLoad {
    /// Successfully loaded records, in sorted filename order.
    pub records: Vec<ScenarioRecord>,
    /// Advisory warnings from lenient loads, prefixed with the file path.
    pub warnings: Vec<String>,
    /// Per-file failures that were skipped.
    pub failures: Vec<StoreError>,
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// flush, fsync, rename.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on any filesystem failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

/// Serializes and atomically writes a record.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on filesystem failure.
pub fn save_record(record: &ScenarioRecord, path: &Path) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Loads and validates a single record file.
///
/// # Errors
///
/// Returns [`StoreError::TooLarge`] over the size cap, [`StoreError::Parse`]
/// for invalid JSON, and [`StoreError::Validation`] for schema violations.
pub fn load_record(path: &Path) -> Result<(ScenarioRecord, Vec<LoadWarning>), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_err)?.len();
    if size > MAX_RECORD_BYTES {
        return Err(StoreError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: MAX_RECORD_BYTES,
        });
    }
    let bytes = std::fs::read(path).map_err(io_err)?;
    let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    ScenarioRecord::from_value(value).map_err(|source| StoreError::Validation {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads every `*.json` record in `dir`, in sorted filename order.
///
/// Malformed files are skipped and reported in [`DirLoad::failures`];
/// duplicate scenario keys abort the whole load.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the directory cannot be scanned and
/// [`StoreError::DuplicateKey`] when two files claim the same identity.
pub fn load_dir(dir: &Path) -> Result<DirLoad, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut out = DirLoad::default();
    let mut seen = BTreeSet::new();
    for path in paths {
        match load_record(&path) {
            Ok((record, warnings)) => {
                let key = record.key().to_string();
                if !seen.insert(key.clone()) {
                    return Err(StoreError::DuplicateKey { key, path });
                }
                for warning in warnings {
                    out.warnings.push(format!("{}: {warning}", path.display()));
                }
                out.records.push(record);
            },
            Err(err) => {
                warn!(path = %path.display(), code = err.code(), "skipping unloadable record");
                out.failures.push(err);
            },
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::capture::{capture_record, CaptureOutcome};
    use crate::canonical::NoopMasker;
    use crate::diff::DiffPolicy;
    use crate::governance::GovernancePolicy;

    fn record(quantity: u32) -> ScenarioRecord {
        capture_record(
            "shop.pricing",
            "total",
            &json!({"sku": "SKU-001", "quantity": quantity}),
            CaptureOutcome::Success(json!({"total": 99.9})),
            &NoopMasker,
            &DiffPolicy::default(),
            &GovernancePolicy::default(),
        )
        .unwrap()
    }

    // =========================================================================
    // Single-record round trip
    // =========================================================================

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        let rec = record(1);
        save_record(&rec, &path).unwrap();
        let (loaded, warnings) = load_record(&path).unwrap();
        assert_eq!(loaded, rec);
        assert!(warnings.is_empty());
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = load_record(&path).unwrap_err();
        assert_eq!(err.code(), "BASELINE_FORMAT_ERROR");
    }

    // =========================================================================
    // Directory loads
    // =========================================================================

    #[test]
    fn directory_load_is_sorted_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        save_record(&record(2), &dir.path().join("b.json")).unwrap();
        save_record(&record(1), &dir.path().join("a.json")).unwrap();
        std::fs::write(dir.path().join("c.json"), b"garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let load = load_dir(dir.path()).unwrap();
        assert_eq!(load.records.len(), 2);
        assert_eq!(load.failures.len(), 1);
        // a.json (quantity 1) sorts before b.json (quantity 2).
        assert_eq!(load.records[0].input["quantity"], json!(1));
    }

    #[test]
    fn duplicate_scenario_keys_abort_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record(1);
        save_record(&rec, &dir.path().join("a.json")).unwrap();
        save_record(&rec, &dir.path().join("b.json")).unwrap();
        let err = load_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_SCENARIO");
    }
}
