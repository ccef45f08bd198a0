//! Commit construction for meta and draft refs.
//!
//! A notes commit has a single-file tree holding the full projection, a message
//! of summary + change messages + trailers, an author naming the acting account
//! (or the server) and the server as committer. Both signatures carry the
//! bucket timestamp, so identical inputs produce identical object ids.

use git2::{Oid, Repository, Signature, Time};
use serde::{Deserialize, Serialize};

use crate::core::{AccountId, PatchSetId, Timestamp, to_canon_json_bytes};

use super::error::NotesError;
use super::event::{Event, EventKind};
use super::projection::{CHANGE_FILE, ChangeNotesState, DRAFTS_FILE, DraftsState};

const BLOB_MODE: i32 = 0o100644;

/// Identity the server signs notes commits with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerIdent {
    pub name: String,
    pub email: String,
    /// Accounts sign as `<id>@<account_domain>`.
    pub account_domain: String,
}

impl Default for ServerIdent {
    fn default() -> Self {
        Self {
            name: "Code Review".into(),
            email: "noreply@code-review.local".into(),
            account_domain: "code-review.local".into(),
        }
    }
}

impl ServerIdent {
    pub fn committer(&self, when: Timestamp) -> Result<Signature<'static>, git2::Error> {
        Signature::new(&self.name, &self.email, &git_time(when))
    }

    /// Author signature for `who`; the server itself when `None`.
    pub fn author(
        &self,
        who: Option<AccountId>,
        when: Timestamp,
    ) -> Result<Signature<'static>, git2::Error> {
        match who {
            Some(account) => Signature::new(
                &format!("Account {account}"),
                &format!("{account}@{}", self.account_domain),
                &git_time(when),
            ),
            None => self.committer(when),
        }
    }
}

fn git_time(when: Timestamp) -> Time {
    Time::new(when.as_secs(), 0)
}

/// Message for a commit carrying `events` (one bucket).
///
/// `patch_set` is the patch set the bucket applies to, used for the summary
/// line and the `Patch-set` trailer.
pub fn change_commit_message(events: &[Event], patch_set: Option<PatchSetId>) -> String {
    let created = events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CreateChange { .. }));
    let uploaded = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::PatchSetCreated { .. }))
        .and_then(|e| e.patch_set);
    let marker = events.iter().find_map(|e| match e.kind {
        EventKind::PrimaryStorageSet { primary } => Some(primary),
        _ => None,
    });

    let summary = match (created, uploaded, marker, patch_set) {
        (true, _, _, _) => "Create change".to_string(),
        (false, Some(ps), _, _) => format!("Create patch set {ps}"),
        (false, None, Some(primary), _) => format!("Set primary storage to {primary}"),
        (false, None, None, Some(ps)) => format!("Update patch set {ps}"),
        (false, None, None, None) => "Update change".to_string(),
    };

    let mut out = summary;
    out.push('\n');

    for event in events {
        if let EventKind::Message { text, .. } = &event.kind {
            out.push('\n');
            out.push_str(text.trim_end());
            out.push('\n');
        }
    }

    let mut trailers: Vec<String> = Vec::new();
    if let Some(ps) = patch_set {
        trailers.push(format!("Patch-set: {ps}"));
    }
    for event in events {
        if let EventKind::CreateChange { subject, .. } = &event.kind {
            trailers.push(format!("Subject: {subject}"));
        }
        if let Some(trailer) = event.trailer()
            && !trailers.contains(&trailer)
        {
            trailers.push(trailer);
        }
    }
    if !trailers.is_empty() {
        out.push('\n');
        for trailer in trailers {
            out.push_str(&trailer);
            out.push('\n');
        }
    }
    out
}

pub fn drafts_commit_message(patch_set: Option<PatchSetId>) -> String {
    match patch_set {
        Some(ps) => format!("Update draft comments\n\nPatch-set: {ps}\n"),
        None => "Update draft comments\n".to_string(),
    }
}

/// Value of the last `key` trailer in the message's trailer block. Lines in
/// the body never count, whatever they look like.
pub fn trailer_value(message: &str, key: &str) -> Result<Option<String>, git2::Error> {
    let trailers = git2::message_trailers_strs(message)?;
    Ok(trailers
        .iter()
        .filter(|(name, _)| *name == key)
        .last()
        .map(|(_, value)| value.trim().to_string()))
}

/// Write a commit whose tree holds `state` and return its id. No ref moves.
pub fn write_change_commit(
    repo: &Repository,
    parent: Option<Oid>,
    state: &ChangeNotesState,
    message: &str,
    author: &Signature<'_>,
    committer: &Signature<'_>,
) -> Result<Oid, NotesError> {
    let bytes = to_canon_json_bytes(state)?;
    write_single_file_commit(repo, parent, CHANGE_FILE, &bytes, message, author, committer)
}

pub fn write_drafts_commit(
    repo: &Repository,
    parent: Option<Oid>,
    drafts: &DraftsState,
    message: &str,
    author: &Signature<'_>,
    committer: &Signature<'_>,
) -> Result<Oid, NotesError> {
    let bytes = to_canon_json_bytes(drafts)?;
    write_single_file_commit(repo, parent, DRAFTS_FILE, &bytes, message, author, committer)
}

fn write_single_file_commit(
    repo: &Repository,
    parent: Option<Oid>,
    file: &str,
    bytes: &[u8],
    message: &str,
    author: &Signature<'_>,
    committer: &Signature<'_>,
) -> Result<Oid, NotesError> {
    let blob = repo.blob(bytes)?;
    let mut builder = repo.treebuilder(None)?;
    builder.insert(file, blob, BLOB_MODE)?;
    let tree = repo.find_tree(builder.write()?)?;
    let parent = parent.map(|oid| repo.find_commit(oid)).transpose()?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(None, author, committer, message, &tree, &parents)?;
    Ok(oid)
}
