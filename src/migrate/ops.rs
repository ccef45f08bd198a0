//! Batch ops used by the migrator.

use std::time::Duration;

use crate::core::{RepoName, Timestamp};
use crate::notes::{Event, EventKind, primary_marker};
use crate::rebuild::{RebuildResult, Rebuilder};
use crate::refs::{RefCache, meta_ref};
use crate::state::{ChangeState, PrimaryStorage};
use crate::update::{BatchUpdateOp, ChangeContext, OpError, RepoContext};

/// A lease this process took and must still hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Lease {
    pub until: Timestamp,
    pub skew: Duration,
}

impl Lease {
    /// Held iff the row still names this lease and it outlives `now` by the
    /// skew margin.
    fn held(&self, state: &ChangeState, now: Timestamp) -> bool {
        state.read_only_until() == Some(self.until) && now.saturating_add(self.skew) < self.until
    }
}

/// Rebuild the notes copy from legacy rows, optionally switching the change
/// to notes primary in the same transaction.
pub(crate) struct RebuildOp {
    rebuilder: Rebuilder,
    flip: bool,
    lease: Option<Lease>,
    result: Option<RebuildResult>,
}

impl RebuildOp {
    pub fn rebuild(rebuilder: Rebuilder) -> Self {
        Self {
            rebuilder,
            flip: false,
            lease: None,
            result: None,
        }
    }

    pub fn flip(rebuilder: Rebuilder, lease: Lease) -> Self {
        Self {
            rebuilder,
            flip: true,
            lease: Some(lease),
            result: None,
        }
    }
}

impl BatchUpdateOp for RebuildOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<(), OpError> {
        let change = ctx
            .change()
            .ok_or_else(|| OpError::msg("rebuild op is not bound to a change"))?;
        if let Some(lease) = &self.lease
            && !lease.held(&ChangeState::effective(change), Timestamp::now())
        {
            return Err(OpError::LeaseLost(change.key()));
        }

        let bundle = ctx.legacy().read_bundle(change.id)?;
        let change_repo = ctx.repo(&change.repo)?.repo();
        let all_users = ctx.repo(&RepoName::all_users())?.repo();
        let caches = ctx.ref_caches();
        let result = if self.flip {
            self.rebuilder
                .build_allowing_empty(&bundle, change_repo, all_users, &caches)?
        } else {
            self.rebuilder.build(&bundle, change_repo, all_users, &caches)?
        };
        for update in &result.ref_updates {
            ctx.repo(&update.repo)?.stage(&update.name, update.new)?;
        }
        self.result = Some(result);
        Ok(())
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        let Some(result) = self.result.take() else {
            return Ok(false);
        };
        let key = ctx.key().clone();
        let refs = result.new_ref_state;
        let state = if self.flip {
            let marker = Event::new(
                None,
                ctx.now(),
                EventKind::PrimaryStorageSet {
                    primary: PrimaryStorage::Notes,
                },
            );
            let tip = ctx.write_notes_commit(vec![marker])?;
            let refs = refs.with(&key.repo, meta_ref(key.id), Some(tip));
            ctx.state()
                .with_primary(PrimaryStorage::Notes, refs)
                .with_marker(Some(tip))
                .with_read_only_until(None)
        } else {
            ctx.state().with_ref_state(refs)
        };
        ctx.set_state(state);
        tracing::debug!(change = %key, flip = self.flip, "notes copy rebuilt");
        // Only the token moves; the change itself is unchanged.
        Ok(false)
    }

    fn bypass_read_only(&self) -> bool {
        self.lease.is_some()
    }
}

/// Take or release the read-only lease on a change row.
pub(crate) struct LeaseOp {
    until: Option<Timestamp>,
    /// Release only if the row still carries this lease.
    release: Option<Timestamp>,
}

impl LeaseOp {
    pub fn acquire(until: Timestamp) -> Self {
        Self {
            until: Some(until),
            release: None,
        }
    }

    pub fn release(held: Timestamp) -> Self {
        Self {
            until: None,
            release: Some(held),
        }
    }
}

impl BatchUpdateOp for LeaseOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        if let Some(held) = self.release
            && ctx.state().read_only_until() != Some(held)
        {
            return Ok(false);
        }
        let state = ctx.state().with_read_only_until(self.until);
        ctx.set_state(state);
        Ok(false)
    }

    fn bypass_read_only(&self) -> bool {
        self.release.is_some()
    }
}

/// Hand a notes-primary change back to the legacy store.
///
/// Legacy rows are not re-derived, so this is only allowed while the meta tip
/// is still the marker that made the change notes primary.
pub(crate) struct LegacyRollbackOp;

impl BatchUpdateOp for LegacyRollbackOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        let key = ctx.key().clone();
        if ctx.state().primary() != PrimaryStorage::Notes {
            return Err(OpError::msg(format!("change {key} is not notes primary")));
        }
        if !ctx.state().is_up_to_date(&key, &ctx.ref_caches())? {
            return Err(OpError::msg(format!("notes copy of change {key} is stale")));
        }
        let view = ctx.repo(&key.repo)?;
        let meta = meta_ref(key.id);
        let at_marker = match view.get(&meta)? {
            Some(tip) if Some(tip) == ctx.state().marker() => {
                primary_marker(view.repo(), tip)? == Some(PrimaryStorage::Notes)
            }
            _ => false,
        };
        if !at_marker {
            return Err(OpError::msg(format!(
                "change {key} was modified after becoming notes primary"
            )));
        }

        let marker = Event::new(
            None,
            ctx.now(),
            EventKind::PrimaryStorageSet {
                primary: PrimaryStorage::Legacy,
            },
        );
        let tip = ctx.write_notes_commit(vec![marker])?;
        let refs = ctx
            .state()
            .ref_state()
            .cloned()
            .unwrap_or_default()
            .with(&key.repo, meta, Some(tip));
        let state = ctx
            .state()
            .with_primary(PrimaryStorage::Legacy, refs)
            .with_marker(None);
        ctx.set_state(state);
        Ok(false)
    }
}
