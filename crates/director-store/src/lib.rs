//! Durable project state for Director.
//!
//! This crate provides the storage layer: `StoreLayout` for the projects,
//! locks and logs directories, `RecordStore` for per-service execution
//! records committed atomically, `ProjectStore` for project-level metadata and
//! the last applied Director file, and `RunLog` for per-run process logs.

pub mod layout;
pub mod project;
pub mod records;
pub mod runlog;

pub use layout::{check_project_name, StoreLayout};
pub use project::{ProjectMeta, ProjectState, ProjectStore};
pub use records::{ExecutionRecord, Fingerprint, Outcome, RecordStore, Stage};
pub use runlog::RunLog;

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `dest` via a temp file in the same directory, fsync and rename.
///
/// A crash at any point leaves either the previous file or the new one, never
/// a partial write.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::Io(std::io::Error::other("destination has no parent")))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("integrity check failed for '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("invalid project name: {0}")]
    InvalidProjectName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            name: "web".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("web"));
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }

    #[test]
    fn store_error_display_project_not_found() {
        let e = StoreError::ProjectNotFound("demo".to_owned());
        assert!(e.to_string().contains("demo"));
    }
}
