//! Parsing notes commits back into projections.

use git2::{ObjectType, Oid, Repository};
use serde::de::DeserializeOwned;

use crate::state::PrimaryStorage;

use super::commit::trailer_value;
use super::error::NotesError;
use super::projection::{CHANGE_FILE, ChangeNotesState, DRAFTS_FILE, DraftsState};

pub fn read_change_state(repo: &Repository, commit: Oid) -> Result<ChangeNotesState, NotesError> {
    read_file(repo, commit, CHANGE_FILE)
}

pub fn read_drafts_state(repo: &Repository, commit: Oid) -> Result<DraftsState, NotesError> {
    read_file(repo, commit, DRAFTS_FILE)
}

/// The `Primary-Storage` trailer of `commit`, if it is a marker commit.
pub fn primary_marker(repo: &Repository, commit: Oid) -> Result<Option<PrimaryStorage>, NotesError> {
    let commit = repo.find_commit(commit)?;
    let message = commit.message().unwrap_or_default();
    Ok(match trailer_value(message, "Primary-Storage")?.as_deref() {
        Some("notes") => Some(PrimaryStorage::Notes),
        Some("legacy") => Some(PrimaryStorage::Legacy),
        _ => None,
    })
}

fn read_file<T: DeserializeOwned>(
    repo: &Repository,
    commit_id: Oid,
    file: &'static str,
) -> Result<T, NotesError> {
    let commit = repo.find_commit(commit_id)?;
    let tree = commit.tree()?;
    let entry = tree.get_name(file).ok_or(NotesError::MissingFile {
        commit: commit_id,
        file,
    })?;
    if entry.kind() != Some(ObjectType::Blob) {
        return Err(NotesError::NotABlob(file));
    }
    let blob = repo.find_blob(entry.id())?;
    serde_json::from_slice(blob.content()).map_err(|source| NotesError::Json {
        commit: commit_id,
        source,
    })
}
