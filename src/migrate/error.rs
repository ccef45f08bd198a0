use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{ChangeId, ChangeKey, CoreError};
use crate::error::{Effect, Transience};
use crate::git::GitError;
use crate::legacy::LegacyError;
use crate::notes::NotesError;
use crate::rebuild::RebuildError;
use crate::state::StateError;
use crate::update::TransactionError;

use super::phase::MigrationPhase;

fn key_list(keys: &[ChangeKey]) -> String {
    keys.iter().map(ChangeKey::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    #[error("invalid migration options: {0}")]
    InvalidOptions(String),
    #[error("trial migration refused: site is already in phase {0}")]
    TrialPastTrial(MigrationPhase),
    #[error("forced rebuild refused: site is already in phase {0}")]
    ForceRebuildPastTrial(MigrationPhase),
    #[error("{failed} change(s) failed to migrate")]
    RebuildFailures { failed: usize },
    #[error("{} change(s) still have stale notes: {}", .0.len(), key_list(.0))]
    StaleChanges(Vec<ChangeKey>),
    #[error("{} change(s) are still legacy primary: {}", .0.len(), key_list(.0))]
    LegacyPrimaryRemain(Vec<ChangeKey>),
    #[error("persisted migration phase is {actual}, expected {expected}")]
    PhaseMismatch {
        expected: MigrationPhase,
        actual: MigrationPhase,
    },
    #[error("cannot move phase from {from} to {to} without force")]
    PhaseChangeRefused {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    #[error("migration cancelled")]
    Cancelled,
    #[error("phase {0} does not allow changing primary storage")]
    PhaseDisallowsFlip(MigrationPhase),
    #[error("change {0} does not exist")]
    NoSuchChange(ChangeId),
    #[error("change {0} is not notes primary")]
    NotNotesPrimary(ChangeKey),
    #[error("meta ref of change {0} does not end in a notes-primary marker")]
    NoNotesMarker(ChangeKey),
    #[error("legacy storage is disabled in phase {0}")]
    LegacyDisabled(MigrationPhase),
    #[error("migration lease on change {0} expired before primary storage changed")]
    LeaseExpired(ChangeKey),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<git2::Error> for MigrationError {
    fn from(err: git2::Error) -> Self {
        MigrationError::Git(GitError::from(err))
    }
}

impl MigrationError {
    pub fn transience(&self) -> Transience {
        match self {
            MigrationError::StaleChanges(_)
            | MigrationError::LegacyPrimaryRemain(_)
            | MigrationError::PhaseMismatch { .. }
            | MigrationError::LeaseExpired(_) => Transience::Retryable,
            MigrationError::RebuildFailures { .. } => Transience::Unknown,
            MigrationError::Config(err) => err.transience(),
            MigrationError::Legacy(err) => err.transience(),
            MigrationError::Git(err) => err.transience(),
            MigrationError::Notes(err) => err.transience(),
            MigrationError::State(err) => err.transience(),
            MigrationError::Rebuild(err) => err.transience(),
            MigrationError::Transaction(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Bulk passes commit change by change before failing as a whole.
            MigrationError::RebuildFailures { .. }
            | MigrationError::StaleChanges(_)
            | MigrationError::LegacyPrimaryRemain(_)
            | MigrationError::Cancelled => Effect::Unknown,
            MigrationError::Transaction(err) => err.effect(),
            MigrationError::Config(err) => err.effect(),
            _ => Effect::None,
        }
    }
}
