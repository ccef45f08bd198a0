//! Git capability error types.

use std::path::PathBuf;

use git2::Oid;
use thiserror::Error;

use crate::core::RepoName;
use crate::error::{Effect, Transience};
use crate::refs::update::fmt_oid;

/// A compare-and-swap lost the race: the live value is not the expected one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "ref {name} in {repo} moved: expected {}, found {}",
    fmt_oid(.expected),
    fmt_oid(.actual)
)]
pub struct RefConflictError {
    pub repo: RepoName,
    pub name: String,
    pub expected: Option<Oid>,
    pub actual: Option<Oid>,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GitError {
    #[error("failed to open repository {repo} at {path}: {source}")]
    OpenRepo {
        repo: RepoName,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("repository {0} does not exist")]
    NoSuchRepo(RepoName),

    #[error("failed to create repository {repo} at {path}: {source}")]
    InitRepo {
        repo: RepoName,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error(transparent)]
    RefConflict(#[from] RefConflictError),

    #[error("ref {name} in {repo} is locked by another writer")]
    Locked { repo: RepoName, name: String },

    #[error("atomic ref update in {repo} failed: {source}")]
    RefTransaction {
        repo: RepoName,
        #[source]
        source: git2::Error,
    },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl GitError {
    pub fn transience(&self) -> Transience {
        match self {
            GitError::RefConflict(_) | GitError::Locked { .. } => Transience::Retryable,
            GitError::RefTransaction { .. } | GitError::Git(_) => Transience::Unknown,
            GitError::OpenRepo { .. } | GitError::NoSuchRepo(_) | GitError::InitRepo { .. } => {
                Transience::Permanent
            }
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Failing while committing a locked transaction can leave some refs written.
            GitError::RefTransaction { .. } => Effect::Unknown,
            GitError::Git(_) => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
