use serde_json::{Value, json};

use crate::migrate::{BulkReport, MigrationReport};

pub(super) mod check;
pub(super) mod init;
pub(super) mod migrate;
pub(super) mod phase;
pub(super) mod primary;
pub(super) mod rebuild;
pub(super) mod sequence;

fn bulk_json(report: &BulkReport) -> Value {
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|(repo, id, reason)| json!({"repo": repo.as_str(), "change": id.get(), "error": reason}))
        .collect();
    json!({
        "attempted": report.attempted,
        "succeeded": report.succeeded,
        "skipped": report.skipped,
        "failed": failed,
        "cancelled": report.cancelled,
        "ref_updates": report.ref_updates,
    })
}

fn bulk_text(label: &str, report: &BulkReport) -> String {
    let mut out = format!(
        "{label}: {} attempted, {} succeeded, {} skipped, {} failed, {} ref update(s)",
        report.attempted,
        report.succeeded,
        report.skipped,
        report.failed.len(),
        report.ref_updates
    );
    if report.cancelled {
        out.push_str(" (cancelled)");
    }
    for (repo, id, reason) in &report.failed {
        out.push_str(&format!("\n  {repo}~{id}: {reason}"));
    }
    out
}

fn migration_json(report: &MigrationReport) -> Value {
    json!({
        "start_phase": report.start_phase.as_str(),
        "end_phase": report.end_phase.as_str(),
        "steps": report.steps.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        "rebuild": report.rebuild.as_ref().map(bulk_json),
        "repairs": report.repairs.iter().map(bulk_json).collect::<Vec<_>>(),
        "flip": report.flip.as_ref().map(bulk_json),
        "sequence_seeded": report.sequence_seeded,
        "ref_updates": report.ref_updates(),
    })
}

fn migration_text(report: &MigrationReport) -> String {
    let mut lines = Vec::new();
    if report.steps.is_empty() {
        lines.push(format!("phase unchanged: {}", report.end_phase));
    } else {
        lines.push(format!("phase {} -> {}", report.start_phase, report.end_phase));
    }
    if let Some(rebuild) = &report.rebuild {
        lines.push(bulk_text("rebuild", rebuild));
    }
    for repair in &report.repairs {
        lines.push(bulk_text("repair", repair));
    }
    if let Some(flip) = &report.flip {
        lines.push(bulk_text("flip", flip));
    }
    if let Some(next) = report.sequence_seeded {
        lines.push(format!("change sequence seeded at {next}"));
    }
    lines.join("\n")
}
