use clap::{Args, builder::BoolishValueParser};

use super::super::{Ctx, emit};
use super::{migration_json, migration_text};
use crate::Result;
use crate::migrate::{CancelToken, MigrateOptions, MigrationPhase, Migrator};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Stop at `trial`: build and keep the notes copy current, flip nothing.
    #[arg(
        long,
        default_value_t = false,
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub trial: bool,

    /// Worker threads for bulk passes (default: config `notedb.threads`).
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Rebuild every change, even ones whose notes copy is current.
    #[arg(long, alias = "force")]
    pub force_rebuild: bool,

    /// Highest phase to reach.
    #[arg(long, value_name = "PHASE")]
    pub stop_at: Option<MigrationPhase>,

    /// Resume this migration on later startups until it completes.
    #[arg(long)]
    pub auto_migrate: bool,
}

pub(crate) fn handle(ctx: &Ctx, args: MigrateArgs) -> Result<()> {
    let config = ctx.site.load_config()?;
    let mut migrator = Migrator::open(ctx.site.clone())?;
    let options = MigrateOptions {
        trial: args.trial || config.notedb.trial,
        force_rebuild: args.force_rebuild,
        threads: args.threads,
        stop_at: args.stop_at,
        auto_migrate: args.auto_migrate,
        ..MigrateOptions::default()
    };
    let report = migrator.migrate(&options, &CancelToken::new())?;
    emit(ctx, migration_json(&report), || migration_text(&report))
}

/// Finish a migration started with `--auto-migrate`, if one is pending.
pub(crate) fn resume(ctx: &Ctx) -> Result<()> {
    if !ctx.site.config_path().exists() {
        return Ok(());
    }
    let mut migrator = Migrator::open(ctx.site.clone())?;
    if let Some(report) = migrator.auto_migrate(&CancelToken::new())? {
        tracing::info!(
            from = %report.start_phase,
            to = %report.end_phase,
            ref_updates = report.ref_updates(),
            "pending migration resumed"
        );
    }
    Ok(())
}
