use super::context::{ChangeContext, RepoContext};
use super::error::OpError;

/// A unit of work bound to one change inside a [`BatchUpdate`](super::BatchUpdate).
///
/// `update_repo` runs for every op before any `update_change`; ref writes are
/// staged, never applied. `update_change` returns whether it modified the
/// change.
pub trait BatchUpdateOp: Send {
    fn update_repo(&mut self, _ctx: &mut RepoContext<'_>) -> Result<(), OpError> {
        Ok(())
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError>;

    /// Run even while the change carries an active migration lease.
    fn bypass_read_only(&self) -> bool {
        false
    }
}

/// Work that touches refs but no change row.
pub trait RepoOnlyOp: Send {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<(), OpError>;
}
