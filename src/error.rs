use thiserror::Error;

use crate::config::ConfigError;
use crate::core::CoreError;
use crate::git::GitError;
use crate::legacy::LegacyError;
use crate::migrate::MigrationError;
use crate::notes::NotesError;
use crate::rebuild::RebuildError;
use crate::site::SiteInitError;
use crate::state::StateError;
use crate::update::TransactionError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (contention on a ref or row).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred; refs or rows may need repair.
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the capability errors; match on those for detail.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Legacy(#[from] LegacyError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Notes(#[from] NotesError),

    #[error(transparent)]
    Rebuild(#[from] RebuildError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    SiteInit(#[from] SiteInitError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::State(e) => e.transience(),
            Error::Legacy(e) => e.transience(),
            Error::Git(e) => e.transience(),
            Error::Notes(e) => e.transience(),
            Error::Rebuild(e) => e.transience(),
            Error::Transaction(e) => e.transience(),
            Error::Migration(e) => e.transience(),
            Error::Config(e) => e.transience(),
            Error::SiteInit(_) | Error::Io(_) => Transience::Unknown,
            Error::Render(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::State(e) => e.effect(),
            Error::Legacy(e) => e.effect(),
            Error::Git(e) => e.effect(),
            Error::Notes(e) => e.effect(),
            Error::Rebuild(e) => e.effect(),
            Error::Transaction(e) => e.effect(),
            Error::Migration(e) => e.effect(),
            Error::Config(e) => e.effect(),
            Error::SiteInit(_) => Effect::Unknown,
            Error::Io(_) | Error::Render(_) => Effect::None,
        }
    }
}
