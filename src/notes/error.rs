use git2::Oid;
use thiserror::Error;

use crate::core::CanonJsonError;
use crate::error::{Effect, Transience};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotesError {
    #[error("missing file in notes tree of {commit}: {file}")]
    MissingFile { commit: Oid, file: &'static str },
    #[error("expected blob for {0}")]
    NotABlob(&'static str),
    #[error("notes json in {commit} is invalid: {source}")]
    Json {
        commit: Oid,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Encode(#[from] CanonJsonError),
    #[error("event for change {change} needs an actor")]
    MissingActor { change: crate::core::ChangeId },
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl NotesError {
    pub fn transience(&self) -> Transience {
        match self {
            NotesError::Git(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        // Objects may already be inserted; they stay unreachable.
        Effect::None
    }
}
