use clap::Args;
use serde_json::json;

use super::super::{Ctx, emit};
use crate::Result;
use crate::core::ChangeId;
use crate::migrate::Migrator;
use crate::rebuild::NotesSource;

#[derive(Args, Debug)]
pub struct CheckArgs {
    pub id: ChangeId,

    /// Also load the change through the notes read path.
    #[arg(long)]
    pub load: bool,
}

pub(crate) fn handle(ctx: &Ctx, args: CheckArgs) -> Result<()> {
    let migrator = Migrator::open(ctx.site.clone())?;
    let check = migrator.check(args.id)?;
    let loaded = if args.load {
        Some(migrator.load_change_notes(args.id)?)
    } else {
        None
    };

    let value = json!({
        "change": check.key.to_string(),
        "primary": check.primary.as_str(),
        "up_to_date": check.up_to_date,
        "read_only_until": check.read_only_until.map(|t| t.as_millis()),
        "meta_tip": check.meta_tip.map(|oid| oid.to_string()),
        "notes": loaded.as_ref().map(|l| json!({
            "source": source_str(l.source),
            "state": l.state,
        })),
    });
    emit(ctx, value, || {
        let mut lines = vec![
            format!("change      {}", check.key),
            format!("primary     {}", check.primary),
            format!("up to date  {}", check.up_to_date),
        ];
        if let Some(until) = check.read_only_until {
            lines.push(format!("read-only   until {until}"));
        }
        match check.meta_tip {
            Some(tip) => lines.push(format!("meta tip    {tip}")),
            None => lines.push("meta tip    (none)".to_string()),
        }
        if let Some(loaded) = &loaded {
            let state = &loaded.state;
            lines.push(format!(
                "notes       {} ({}): {:?} [{}], {} patch set(s), {} approval(s)",
                source_str(loaded.source),
                state.status,
                state.subject,
                state.branch,
                state.patch_sets.len(),
                state.approvals.len()
            ));
        }
        lines.join("\n")
    })
}

fn source_str(source: NotesSource) -> &'static str {
    match source {
        NotesSource::Stored => "stored",
        NotesSource::Rebuilt => "rebuilt",
    }
}
