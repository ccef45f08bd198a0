use thiserror::Error;

use crate::core::ChangeKey;
use crate::error::{Effect, Transience};
use crate::git::GitError;
use crate::legacy::LegacyError;
use crate::notes::NotesError;
use crate::state::StateError;

/// Legacy rows that cannot be turned into a consistent history.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("corrupt legacy data for change {change} at {row}: {reason}")]
pub struct CorruptLegacyDataError {
    pub change: ChangeKey,
    /// `<table>/<row id>`.
    pub row: String,
    pub reason: String,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RebuildError {
    #[error("change {0} has no patch sets")]
    NoPatchSets(ChangeKey),
    #[error(transparent)]
    CorruptLegacyData(#[from] CorruptLegacyDataError),
    #[error("change {0} is notes primary; refusing to rebuild from legacy rows")]
    NotesPrimary(ChangeKey),
    #[error("notes copy of notes-primary change {0} is stale")]
    StaleNotesPrimary(ChangeKey),
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<git2::Error> for RebuildError {
    fn from(err: git2::Error) -> Self {
        RebuildError::Git(GitError::from(err))
    }
}

impl RebuildError {
    pub fn transience(&self) -> Transience {
        match self {
            RebuildError::Legacy(err) => err.transience(),
            RebuildError::Notes(err) => err.transience(),
            RebuildError::Git(err) => err.transience(),
            RebuildError::State(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        // Rebuild only inserts unreachable objects.
        Effect::None
    }
}
