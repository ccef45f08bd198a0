use clap::Subcommand;
use serde_json::json;

use super::super::{Ctx, emit};
use crate::Result;
use crate::core::ChangeId;
use crate::migrate::Migrator;

#[derive(Subcommand, Debug)]
pub enum PrimaryCmd {
    /// Make the change notes primary.
    Notes { id: ChangeId },
    /// Return a notes-primary change to the legacy store.
    Legacy { id: ChangeId },
}

pub(crate) fn handle(ctx: &Ctx, cmd: PrimaryCmd) -> Result<()> {
    let migrator = Migrator::open(ctx.site.clone())?;
    match cmd {
        PrimaryCmd::Notes { id } => {
            let outcome = migrator.migrate_to_notes_primary(id)?;
            emit(
                ctx,
                json!({"change": id.get(), "primary": "notes", "ref_updates": outcome.ref_updates()}),
                || format!("change {id} is notes primary ({outcome:?})"),
            )
        }
        PrimaryCmd::Legacy { id } => {
            migrator.migrate_to_legacy_primary(id)?;
            emit(
                ctx,
                json!({"change": id.get(), "primary": "legacy"}),
                || format!("change {id} is legacy primary"),
            )
        }
    }
}
