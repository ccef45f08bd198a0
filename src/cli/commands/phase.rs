use clap::Subcommand;
use serde_json::json;

use super::super::{Ctx, emit};
use crate::Result;
use crate::migrate::{MigrationPhase, Migrator};

#[derive(Subcommand, Debug)]
pub enum PhaseCmd {
    /// Print the phase and what it enables.
    Show,
    /// Move the phase without running any migration pass.
    Set {
        phase: MigrationPhase,
        /// Allow moves other than a safe step back.
        #[arg(long)]
        force: bool,
    },
}

pub(crate) fn handle(ctx: &Ctx, cmd: PhaseCmd) -> Result<()> {
    let mut migrator = Migrator::open(ctx.site.clone())?;
    if let PhaseCmd::Set { phase, force } = cmd {
        migrator.set_phase(phase, force)?;
    }
    let config = ctx.site.load_config()?;
    let phase = migrator.phase();
    let value = json!({
        "phase": phase.as_str(),
        "trial": config.notedb.trial,
        "auto_migrate": config.notedb.auto_migrate,
        "writes_notes": phase.writes_notes(),
        "reads_notes": phase.reads_notes(),
        "uses_notes_sequence": phase.uses_notes_sequence(),
        "allows_primary_flip": phase.allows_primary_flip(),
        "legacy_disabled": phase.legacy_disabled(),
    });
    emit(ctx, value, || describe(phase, config.notedb.auto_migrate))
}

fn describe(phase: MigrationPhase, auto_migrate: bool) -> String {
    let mut lines = vec![format!("phase: {phase}")];
    let flags = [
        ("writes notes", phase.writes_notes()),
        ("reads notes", phase.reads_notes()),
        ("notes sequence", phase.uses_notes_sequence()),
        ("primary flip", phase.allows_primary_flip()),
        ("legacy disabled", phase.legacy_disabled()),
    ];
    for (name, on) in flags {
        lines.push(format!("  {name:<16}{}", if on { "yes" } else { "no" }));
    }
    if auto_migrate {
        lines.push("  migration resumes automatically".to_string());
    }
    lines.join("\n")
}
