//! Change-id sequence kept in `All-Projects`.
//!
//! The ref points at a blob holding the next id to hand out, in decimal.

use crate::core::RepoName;
use crate::refs::{RefCache, SEQUENCE_CHANGES, StagedRefView};
use crate::update::{OpError, RepoContext, RepoOnlyOp};

/// Next id recorded in the sequence, if the sequence exists.
pub fn read_sequence(view: &StagedRefView<'_>) -> Result<Option<u32>, OpError> {
    let Some(oid) = view.get(SEQUENCE_CHANGES)? else {
        return Ok(None);
    };
    let blob = view.repo().find_blob(oid)?;
    let text = std::str::from_utf8(blob.content())
        .map_err(|_| OpError::msg("change sequence blob is not utf-8"))?;
    text.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|err| OpError::msg(format!("change sequence value {text:?}: {err}")))
}

fn write_sequence(view: &StagedRefView<'_>, next: u32) -> Result<(), OpError> {
    let oid = view.repo().blob(next.to_string().as_bytes())?;
    view.stage(SEQUENCE_CHANGES, Some(oid))?;
    Ok(())
}

/// Raise the sequence to at least `floor`; never lowers it.
pub(crate) struct SeedSequenceOp<'o> {
    pub floor: u32,
    pub seeded: &'o mut Option<u32>,
}

impl RepoOnlyOp for SeedSequenceOp<'_> {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<(), OpError> {
        let view = ctx.repo(&RepoName::all_projects())?;
        let current = read_sequence(view)?;
        let next = match current {
            Some(value) if value >= self.floor => value,
            _ => {
                write_sequence(view, self.floor)?;
                self.floor
            }
        };
        *self.seeded = Some(next);
        Ok(())
    }
}

/// Take one id from the sequence, seeding it first if needed.
pub(crate) struct AllocateIdOp<'o> {
    /// Ids at or below this exist in the legacy store.
    pub legacy_max: u32,
    pub gap: u32,
    pub allocated: &'o mut Option<u32>,
}

impl RepoOnlyOp for AllocateIdOp<'_> {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<(), OpError> {
        let view = ctx.repo(&RepoName::all_projects())?;
        let floor = self.legacy_max.saturating_add(1);
        let next = match read_sequence(view)? {
            Some(value) => value.max(floor),
            None => floor.saturating_add(self.gap),
        };
        let after = next
            .checked_add(1)
            .ok_or_else(|| OpError::msg("change sequence exhausted"))?;
        write_sequence(view, after)?;
        *self.allocated = Some(next);
        Ok(())
    }
}
