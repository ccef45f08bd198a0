use std::path::PathBuf;

use thiserror::Error;

use crate::core::ChangeId;
use crate::error::{Effect, Transience};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LegacyError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("legacy schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: u32, got: u32 },
    #[error("change {0} does not exist")]
    NoSuchChange(ChangeId),
    #[error("change {0} already exists")]
    ChangeExists(ChangeId),
    #[error("change {change} was modified concurrently: expected row version {expected}, found {actual}")]
    RowVersionConflict {
        change: ChangeId,
        expected: u64,
        actual: u64,
    },
    #[error("row {row} in {table} is unreadable: {reason}")]
    CorruptRow {
        table: &'static str,
        row: i64,
        reason: String,
    },
}

impl LegacyError {
    pub fn transience(&self) -> Transience {
        match self {
            LegacyError::RowVersionConflict { .. } => Transience::Retryable,
            LegacyError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Transience::Retryable
            }
            LegacyError::Sqlite(_) | LegacyError::Io { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        // Writes run in one sqlite transaction; a failed commit rolls back.
        Effect::None
    }
}
