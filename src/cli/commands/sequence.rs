use clap::Subcommand;
use serde_json::json;

use super::super::{Ctx, emit};
use crate::Result;
use crate::migrate::Migrator;

#[derive(Subcommand, Debug)]
pub enum SequenceCmd {
    /// Seed the sequence past every legacy change id.
    Seed,
    /// Hand out the next change id.
    Next,
}

pub(crate) fn handle(ctx: &Ctx, cmd: SequenceCmd) -> Result<()> {
    let migrator = Migrator::open(ctx.site.clone())?;
    match cmd {
        SequenceCmd::Seed => {
            let next = migrator.seed_sequence()?;
            emit(ctx, json!({"next": next}), || format!("next change id: {next}"))
        }
        SequenceCmd::Next => {
            let id = migrator.allocate_change_id()?;
            emit(ctx, json!({"id": id.get()}), || id.to_string())
        }
    }
}
