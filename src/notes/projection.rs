//! Full change state as stored in every notes commit.
//!
//! Each commit on a meta ref carries the complete projection, never a delta,
//! so any single commit parses into the state of the change at that point.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::{AccountId, ChangeId, ChangeStatus, PatchSetId, RepoName, Timestamp};

pub const CHANGE_FILE: &str = "change.json";
pub const DRAFTS_FILE: &str = "drafts.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSetNote {
    pub id: PatchSetId,
    pub revision: String,
    pub uploader: AccountId,
    pub created_on: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalNote {
    pub patch_set: PatchSetId,
    pub label: String,
    pub account: AccountId,
    pub value: i16,
    pub granted: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageNote {
    pub uuid: String,
    pub author: Option<AccountId>,
    pub written_on: Timestamp,
    pub patch_set: Option<PatchSetId>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentNote {
    pub uuid: String,
    pub patch_set: PatchSetId,
    pub author: AccountId,
    pub written_on: Timestamp,
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotesState {
    pub change_id: ChangeId,
    pub repo: RepoName,
    pub branch: String,
    pub subject: String,
    pub owner: Option<AccountId>,
    pub status: ChangeStatus,
    pub created_on: Timestamp,
    pub last_updated_on: Timestamp,
    pub current_patch_set: Option<PatchSetId>,
    pub patch_sets: Vec<PatchSetNote>,
    pub approvals: Vec<ApprovalNote>,
    pub reviewers: BTreeSet<AccountId>,
    pub messages: Vec<MessageNote>,
    pub comments: Vec<CommentNote>,
    pub hashtags: BTreeSet<String>,
}

impl ChangeNotesState {
    pub fn empty(repo: RepoName, change_id: ChangeId) -> Self {
        Self {
            change_id,
            repo,
            branch: String::new(),
            subject: String::new(),
            owner: None,
            status: ChangeStatus::New,
            created_on: Timestamp::from_millis(0),
            last_updated_on: Timestamp::from_millis(0),
            current_patch_set: None,
            patch_sets: Vec::new(),
            approvals: Vec::new(),
            reviewers: BTreeSet::new(),
            messages: Vec::new(),
            comments: Vec::new(),
            hashtags: BTreeSet::new(),
        }
    }

    pub fn has_patch_set(&self, id: PatchSetId) -> bool {
        self.patch_sets.iter().any(|ps| ps.id == id)
    }

    pub fn approval(&self, patch_set: PatchSetId, label: &str, account: AccountId) -> Option<i16> {
        self.approvals
            .iter()
            .find(|a| a.patch_set == patch_set && a.label == label && a.account == account)
            .map(|a| a.value)
    }

    pub(crate) fn upsert_approval(&mut self, note: ApprovalNote) {
        match self.approvals.iter_mut().find(|a| {
            a.patch_set == note.patch_set && a.label == note.label && a.account == note.account
        }) {
            Some(existing) => *existing = note,
            None => {
                self.approvals.push(note);
                self.approvals.sort_by(|a, b| {
                    (a.patch_set, &a.label, a.account).cmp(&(b.patch_set, &b.label, b.account))
                });
            }
        }
    }

    pub(crate) fn remove_approval(&mut self, patch_set: PatchSetId, label: &str, account: AccountId) {
        self.approvals
            .retain(|a| !(a.patch_set == patch_set && a.label == label && a.account == account));
    }
}

/// Unpublished comments of one account on one change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftsState {
    pub change_id: ChangeId,
    pub account: AccountId,
    pub comments: Vec<CommentNote>,
}
