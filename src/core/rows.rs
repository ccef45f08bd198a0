//! Legacy child rows of a change, as read for a rebuild.

use serde::{Deserialize, Serialize};

use super::change::Change;
use super::identity::{AccountId, ChangeId, PatchSetId};
use super::time::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchSetRow {
    pub change: ChangeId,
    pub id: PatchSetId,
    pub revision: String,
    pub uploader: AccountId,
    pub created_on: Timestamp,
}

/// One vote.
///
/// `value: None` is a reviewer without a score; `Some(0)` is the sentinel the
/// legacy store writes when a vote is deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRow {
    pub row_id: i64,
    pub change: ChangeId,
    pub patch_set: PatchSetId,
    pub account: AccountId,
    pub label: String,
    pub value: Option<i16>,
    pub granted: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRow {
    pub row_id: i64,
    pub change: ChangeId,
    pub uuid: String,
    /// `None` for messages written by the server itself.
    pub author: Option<AccountId>,
    pub written_on: Timestamp,
    pub patch_set: Option<PatchSetId>,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    Published,
    Draft,
}

impl CommentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentStatus::Published => "published",
            CommentStatus::Draft => "draft",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentRow {
    pub row_id: i64,
    pub change: ChangeId,
    pub patch_set: PatchSetId,
    pub uuid: String,
    pub author: AccountId,
    pub written_on: Timestamp,
    pub file: String,
    pub line: Option<u32>,
    pub message: String,
    pub status: CommentStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashtagRow {
    pub row_id: i64,
    pub change: ChangeId,
    pub account: AccountId,
    pub added_on: Timestamp,
    pub hashtag: String,
}

/// Approval category known to the site.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelType {
    pub name: String,
    pub min: i16,
    pub max: i16,
}

impl LabelType {
    pub fn new(name: impl Into<String>, min: i16, max: i16) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn allows(&self, value: i16) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Everything the legacy store knows about one change, in stable query order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBundle {
    pub change: Change,
    pub patch_sets: Vec<PatchSetRow>,
    pub approvals: Vec<ApprovalRow>,
    pub messages: Vec<MessageRow>,
    pub comments: Vec<CommentRow>,
    pub hashtags: Vec<HashtagRow>,
    pub label_types: Vec<LabelType>,
}

impl ChangeBundle {
    pub fn label_type(&self, name: &str) -> Option<&LabelType> {
        self.label_types.iter().find(|label| label.name == name)
    }
}
