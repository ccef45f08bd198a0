//! Git ref/object capability.
//!
//! - `RepoManager`: bare repositories of a site by name
//! - `apply_atomic`: per-repository multi-ref compare-and-swap

pub mod cas;
pub mod error;
pub mod repos;

pub use cas::apply_atomic;
pub use error::{GitError, RefConflictError};
pub use repos::RepoManager;
