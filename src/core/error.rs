//! Core capability errors (parsing and validation of domain atoms).

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("repository name `{raw}` is invalid: {reason}")]
    Repo { raw: String, reason: String },
    #[error("change id `{raw}` is invalid: {reason}")]
    Change { raw: String, reason: String },
    #[error("account id `{raw}` is invalid: {reason}")]
    Account { raw: String, reason: String },
    #[error("patch set id `{raw}` is invalid: {reason}")]
    PatchSet { raw: String, reason: String },
    #[error("object id `{raw}` is invalid: {reason}")]
    Object { raw: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("change status `{raw}` is invalid")]
pub struct InvalidStatus {
    pub raw: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatus),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
