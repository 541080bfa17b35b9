//! Error type shared by the import pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    /// A per-folder metadata file is corrupt beyond per-record recovery.
    #[error("malformed metadata in section [{section}]: {reason}")]
    MalformedRecord { section: String, reason: String },

    #[error("malformed contacts registry: {0}")]
    MalformedRegistry(String),

    #[error("failed to back up {db} to {backup}: {source}")]
    Backup {
        db: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database {0} is locked by another process (is digiKam still running?)")]
    StoreLocked(PathBuf),

    #[error("cannot open database {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("unexpected digiKam schema: {0}")]
    Schema(String),

    #[error("failed to commit changes to {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    pub fn malformed(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            section: section.into(),
            reason: reason.into(),
        }
    }

    /// Map a SQLite error to `StoreLocked` when it signals contention.
    pub fn from_sqlite(path: &std::path::Path, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                Self::StoreLocked(path.to_path_buf())
            }
            _ => Self::Sqlite(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
