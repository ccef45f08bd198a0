use clap::Args;

use super::super::{Ctx, emit};
use super::{bulk_json, bulk_text};
use crate::Result;
use crate::core::{ChangeId, RepoName};
use crate::migrate::{CancelToken, MigrateOptions, MigrationError, Migrator};

#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// Only this change (repeatable).
    #[arg(long, value_name = "ID")]
    pub change: Vec<ChangeId>,

    /// Only changes in this repository (repeatable).
    #[arg(long, value_name = "NAME")]
    pub repo: Vec<RepoName>,

    /// Rebuild even when the notes copy is current.
    #[arg(long)]
    pub force: bool,

    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

pub(crate) fn handle(ctx: &Ctx, args: RebuildArgs) -> Result<()> {
    let migrator = Migrator::open(ctx.site.clone())?;
    let options = MigrateOptions {
        changes: args.change,
        repos: args.repo,
        force_rebuild: args.force,
        threads: args.threads,
        ..MigrateOptions::default()
    };
    let report = migrator.rebuild(&options, &CancelToken::new())?;
    emit(ctx, bulk_json(&report), || bulk_text("rebuild", &report))?;
    if !report.failed.is_empty() {
        return Err(MigrationError::RebuildFailures {
            failed: report.failed.len(),
        }
        .into());
    }
    Ok(())
}
