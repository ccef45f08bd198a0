#![forbid(unsafe_code)]

//! Migration of code-review change metadata from a relational store into
//! per-change git histories ("notes"), with both stores kept consistent while
//! the site moves between them.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod legacy;
pub mod migrate;
pub mod notes;
mod paths;
pub mod rebuild;
pub mod refs;
pub mod site;
pub mod state;
pub mod telemetry;
pub mod update;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::core::{
    AccountId, Change, ChangeBundle, ChangeId, ChangeKey, ChangeStatus, LabelType, PatchSetId,
    RepoName, Timestamp,
};
pub use crate::migrate::{CancelToken, MigrateOptions, MigrationPhase, Migrator, MigratorSettings};
pub use crate::rebuild::Rebuilder;
pub use crate::site::Site;
pub use crate::state::{ChangeState, PrimaryStorage, RefState};
pub use crate::update::{BatchUpdate, BatchUpdateOp, RepoOnlyOp, TransactionError};
