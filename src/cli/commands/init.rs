use serde_json::json;

use super::super::{Ctx, emit};
use crate::Result;
use crate::migrate::PhaseStore;

pub(crate) fn handle(ctx: &Ctx) -> Result<()> {
    ctx.site.init()?;
    let phase = PhaseStore::for_site(&ctx.site).load()?;
    let root = ctx.site.root().display().to_string();
    emit(
        ctx,
        json!({"site": root, "phase": phase.as_str()}),
        || format!("initialized site at {root} (phase {phase})"),
    )
}
