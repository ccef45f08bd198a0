use crate::core::RepoName;
use crate::refs::RefUpdate;

use super::error::OpError;

/// Hooks between the execution phases of a batch.
///
/// An error from any hook fails the batch exactly as an op failure at that
/// point would, including compensation of repositories already written.
pub trait BatchUpdateListener: Send {
    fn after_update_repos(&mut self) -> Result<(), OpError> {
        Ok(())
    }

    fn after_update_changes(&mut self) -> Result<(), OpError> {
        Ok(())
    }

    /// `updates` were just applied to `repo`.
    fn after_ref_updates(&mut self, _repo: &RepoName, _updates: &[RefUpdate]) -> Result<(), OpError> {
        Ok(())
    }
}
