use thiserror::Error;

use crate::core::{ChangeId, ChangeKey, RepoName, Timestamp};
use crate::error::{Effect, Transience};
use crate::git::{GitError, RefConflictError};
use crate::legacy::LegacyError;
use crate::notes::NotesError;
use crate::rebuild::RebuildError;
use crate::refs::RefUpdate;
use crate::state::StateError;

/// Failure raised by an op hook or a listener.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OpError {
    #[error("{0}")]
    Failed(String),
    #[error("repository {0} is not part of this transaction")]
    UnknownRepo(RepoName),
    #[error("operation needs an acting account")]
    NoUser,
    #[error("migration lease on change {0} was lost or expired")]
    LeaseLost(ChangeKey),
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl OpError {
    pub fn msg(message: impl Into<String>) -> Self {
        OpError::Failed(message.into())
    }
}

impl From<git2::Error> for OpError {
    fn from(err: git2::Error) -> Self {
        OpError::Git(GitError::from(err))
    }
}

/// Rolling back applied ref updates failed; refs were left in their new state.
#[derive(Debug, Error)]
#[error(
    "compensation failed in {}: {} ref(s) left in new state after: {cause}",
    repo_list(.unrestored),
    .unrestored.len()
)]
pub struct CompensationFailureError {
    pub unrestored: Vec<RefUpdate>,
    #[source]
    pub cause: Box<TransactionError>,
}

impl CompensationFailureError {
    pub fn repos(&self) -> Vec<RepoName> {
        let mut repos: Vec<RepoName> = self.unrestored.iter().map(|u| u.repo.clone()).collect();
        repos.dedup();
        repos
    }
}

fn repo_list(updates: &[RefUpdate]) -> String {
    let mut names: Vec<&str> = updates.iter().map(|u| u.repo.as_str()).collect();
    names.dedup();
    names.join(", ")
}

fn change_suffix(change: &Option<ChangeKey>) -> String {
    change.as_ref().map(|c| format!(" for {c}")).unwrap_or_default()
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransactionError {
    #[error("change {0} does not exist")]
    ChangeNotFound(ChangeId),
    #[error("change {change} is read-only until {until}")]
    ReadOnly { change: ChangeKey, until: Timestamp },
    #[error("{phase} failed{}: {source}", change_suffix(.change))]
    Op {
        change: Option<ChangeKey>,
        phase: &'static str,
        #[source]
        source: OpError,
    },
    #[error(transparent)]
    RefConflict(RefConflictError),
    #[error(transparent)]
    Compensation(#[from] CompensationFailureError),
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Git(GitError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("notes copy of notes-primary change {0} is stale")]
    StaleNotesPrimary(ChangeKey),
    #[error("legacy-primary change {0} cannot be written: legacy storage is disabled")]
    LegacyDisabled(ChangeKey),
    #[error("transaction deadline exceeded during {phase}")]
    Timeout { phase: &'static str },
}

impl From<GitError> for TransactionError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::RefConflict(conflict) => TransactionError::RefConflict(conflict),
            other => TransactionError::Git(other),
        }
    }
}

impl From<RefConflictError> for TransactionError {
    fn from(err: RefConflictError) -> Self {
        TransactionError::RefConflict(err)
    }
}

impl From<git2::Error> for TransactionError {
    fn from(err: git2::Error) -> Self {
        TransactionError::Git(GitError::from(err))
    }
}

impl TransactionError {
    /// A concurrent writer won; rereading and retrying may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TransactionError::RefConflict(_)
                | TransactionError::Legacy(LegacyError::RowVersionConflict { .. })
        )
    }

    pub fn transience(&self) -> Transience {
        match self {
            TransactionError::RefConflict(_) | TransactionError::Timeout { .. } => {
                Transience::Retryable
            }
            TransactionError::Legacy(err) => err.transience(),
            TransactionError::Git(err) => err.transience(),
            TransactionError::Notes(err) => err.transience(),
            TransactionError::State(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            TransactionError::Compensation(_) => Effect::Some,
            _ => Effect::None,
        }
    }
}
