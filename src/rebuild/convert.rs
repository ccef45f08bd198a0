//! Legacy rows → ordered domain events.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::core::{ChangeBundle, ChangeStatus, CommentStatus, PatchSetId, Timestamp};
use crate::notes::{ChangeNotesState, Event, EventKind};

use super::error::CorruptLegacyDataError;

const MERGED_PREFIX: &str = "Change has been successfully merged";
const ABANDONED_PREFIX: &str = "Abandoned";
const RESTORED_PREFIX: &str = "Restored";

/// Validate `bundle` and turn every row into its event, in commit order.
///
/// The first event is always `CreateChange`. A trailing `FinalUpdates` event
/// is added only when the rows alone do not reproduce the change row.
pub(crate) fn collect_events(bundle: &ChangeBundle) -> Result<Vec<Event>, CorruptLegacyDataError> {
    let change = &bundle.change;
    let key = change.key();
    let corrupt = |table: &str, row: i64, reason: String| CorruptLegacyDataError {
        change: key.clone(),
        row: format!("{table}/{row}"),
        reason,
    };

    let known: BTreeSet<PatchSetId> = bundle.patch_sets.iter().map(|ps| ps.id).collect();
    let kept = |ps: PatchSetId| match change.current_patch_set {
        Some(current) => ps <= current,
        None => true,
    };
    let check_ps = |table: &str, row: i64, ps: PatchSetId| {
        if known.contains(&ps) {
            Ok(kept(ps))
        } else {
            Err(corrupt(table, row, format!("patch set {ps} does not exist")))
        }
    };

    let mut events = Vec::new();

    for ps in &bundle.patch_sets {
        if !kept(ps.id) {
            tracing::info!(change = %key, patch_set = %ps.id, "skipping patch set above current");
            continue;
        }
        events.push(
            Event::new(
                Some(ps.uploader),
                ps.created_on,
                EventKind::PatchSetCreated {
                    revision: ps.revision.clone(),
                },
            )
            .on_patch_set(Some(ps.id))
            .with_row_id(i64::from(ps.id.get())),
        );
    }

    for row in &bundle.approvals {
        if !check_ps("approvals", row.row_id, row.patch_set)? {
            continue;
        }
        let Some(label) = bundle.label_type(&row.label) else {
            return Err(corrupt(
                "approvals",
                row.row_id,
                format!("unknown label {}", row.label),
            ));
        };
        let kind = match row.value {
            None => EventKind::NoVote {
                label: row.label.clone(),
            },
            Some(0) => EventKind::VoteRemoved {
                label: row.label.clone(),
            },
            Some(value) if label.allows(value) => EventKind::VoteCast {
                label: row.label.clone(),
                value,
            },
            Some(value) => {
                return Err(corrupt(
                    "approvals",
                    row.row_id,
                    format!("value {value} outside {}..={}", label.min, label.max),
                ));
            }
        };
        events.push(
            Event::new(Some(row.account), row.granted, kind)
                .on_patch_set(Some(row.patch_set))
                .with_row_id(row.row_id),
        );
    }

    for row in &bundle.messages {
        if let Some(ps) = row.patch_set
            && !check_ps("messages", row.row_id, ps)?
        {
            continue;
        }
        let uuid = if row.uuid.is_empty() {
            derived_uuid(&["message", &key.to_string(), &row.row_id.to_string(), &row.message])
        } else {
            row.uuid.clone()
        };
        events.push(
            Event::new(
                row.author,
                row.written_on,
                EventKind::Message {
                    uuid,
                    text: row.message.clone(),
                },
            )
            .on_patch_set(row.patch_set)
            .with_row_id(row.row_id),
        );
        if let Some(status) = status_from_message(&row.message) {
            events.push(
                Event::new(row.author, row.written_on, EventKind::StatusChanged { status })
                    .on_patch_set(row.patch_set)
                    .with_row_id(row.row_id),
            );
        }
    }

    for row in &bundle.comments {
        if !check_ps("comments", row.row_id, row.patch_set)? {
            continue;
        }
        let uuid = if row.uuid.is_empty() {
            derived_uuid(&["comment", &key.to_string(), &row.row_id.to_string(), &row.message])
        } else {
            row.uuid.clone()
        };
        let kind = match row.status {
            CommentStatus::Published => EventKind::CommentPublished {
                uuid,
                file: row.file.clone(),
                line: row.line,
                text: row.message.clone(),
            },
            CommentStatus::Draft => EventKind::DraftComment {
                uuid,
                file: row.file.clone(),
                line: row.line,
                text: row.message.clone(),
            },
        };
        events.push(
            Event::new(Some(row.author), row.written_on, kind)
                .on_patch_set(Some(row.patch_set))
                .with_row_id(row.row_id),
        );
    }

    for row in &bundle.hashtags {
        events.push(
            Event::new(
                Some(row.account),
                row.added_on,
                EventKind::HashtagAdded {
                    hashtag: row.hashtag.clone(),
                },
            )
            .with_row_id(row.row_id),
        );
    }

    events.sort_by_key(Event::sort_key);
    let mut events = defer_until_patch_set(events);

    let created_on = events
        .first()
        .map_or(change.created_on, |first| first.when.min(change.created_on));
    events.insert(
        0,
        Event::new(
            Some(change.owner),
            created_on,
            EventKind::CreateChange {
                branch: change.branch.clone(),
                subject: change.subject.clone(),
                owner: change.owner,
            },
        ),
    );
    clamp_timestamps(&mut events);

    let mut projection = ChangeNotesState::empty(change.repo.clone(), change.id);
    for event in events.iter().filter(|e| !e.kind.is_draft()) {
        event.apply(&mut projection);
    }
    if projection.subject != change.subject
        || projection.status != change.status
        || projection.current_patch_set != change.current_patch_set
    {
        let last = events.last().map_or(created_on, |e| e.when);
        events.push(Event::new(
            None,
            last.max(change.last_updated_on),
            EventKind::FinalUpdates {
                subject: change.subject.clone(),
                status: change.status,
                current_patch_set: change.current_patch_set,
            },
        ));
    }
    Ok(events)
}

/// Hold events that reference a patch set until its creation event.
fn defer_until_patch_set(events: Vec<Event>) -> Vec<Event> {
    let mut created = BTreeSet::new();
    let mut pending: BTreeMap<PatchSetId, Vec<Event>> = BTreeMap::new();
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        match (&event.kind, event.patch_set) {
            (EventKind::PatchSetCreated { .. }, Some(ps)) => {
                created.insert(ps);
                out.push(event);
                out.extend(pending.remove(&ps).unwrap_or_default());
            }
            (_, Some(ps)) if !created.contains(&ps) => {
                pending.entry(ps).or_default().push(event);
            }
            _ => out.push(event),
        }
    }
    out.extend(pending.into_values().flatten());
    out
}

fn clamp_timestamps(events: &mut [Event]) {
    let mut floor = Timestamp::from_millis(i64::MIN);
    for event in events {
        if event.when < floor {
            event.when = floor;
        }
        floor = event.when;
    }
}

fn status_from_message(message: &str) -> Option<ChangeStatus> {
    if message.starts_with(MERGED_PREFIX) {
        Some(ChangeStatus::Merged)
    } else if message.starts_with(ABANDONED_PREFIX) {
        Some(ChangeStatus::Abandoned)
    } else if message.starts_with(RESTORED_PREFIX) {
        Some(ChangeStatus::New)
    } else {
        None
    }
}

/// Stable 32-hex-digit key for rows stored without a uuid.
fn derived_uuid(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}
