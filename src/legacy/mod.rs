//! Relational system of record for change metadata.
//!
//! Consumed through [`LegacyStore`]: keyed row reads, and one commit per
//! transaction for staged writes. Change rows carry a `row_version` that every
//! update must name; a mismatch rejects the whole commit.

mod error;
mod sqlite;

pub use error::LegacyError;
pub use sqlite::SqliteLegacyStore;

use crate::core::{
    ApprovalRow, Change, ChangeBundle, ChangeId, ChangeKey, CommentRow, HashtagRow, LabelType,
    MessageRow, PatchSetRow, RepoName,
};

/// Which changes a listing covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChangeFilter {
    #[default]
    All,
    Repos(Vec<RepoName>),
    Changes(Vec<ChangeId>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeWrite {
    Insert(Change),
    /// Replace the row if its `row_version` still equals `expected_version`.
    Update {
        change: Change,
        expected_version: u64,
    },
}

impl ChangeWrite {
    pub fn change_id(&self) -> ChangeId {
        match self {
            ChangeWrite::Insert(change) | ChangeWrite::Update { change, .. } => change.id,
        }
    }
}

/// Rows staged by one transaction.
///
/// `row_id` fields of staged child rows are ignored; the store assigns them.
/// Approvals are keyed by (change, patch set, account, label) and replace any
/// existing vote for that key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyWrites {
    pub changes: Vec<ChangeWrite>,
    pub patch_sets: Vec<PatchSetRow>,
    pub approvals: Vec<ApprovalRow>,
    pub messages: Vec<MessageRow>,
    pub comments: Vec<CommentRow>,
    pub hashtags: Vec<HashtagRow>,
}

impl LegacyWrites {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
            && self.patch_sets.is_empty()
            && self.approvals.is_empty()
            && self.messages.is_empty()
            && self.comments.is_empty()
            && self.hashtags.is_empty()
    }

    pub fn extend(&mut self, other: LegacyWrites) {
        self.changes.extend(other.changes);
        self.patch_sets.extend(other.patch_sets);
        self.approvals.extend(other.approvals);
        self.messages.extend(other.messages);
        self.comments.extend(other.comments);
        self.hashtags.extend(other.hashtags);
    }
}

pub trait LegacyStore {
    fn read_change(&self, id: ChangeId) -> Result<Option<Change>, LegacyError>;

    /// All rows of one change in stable query order, plus site label types.
    fn read_bundle(&self, id: ChangeId) -> Result<ChangeBundle, LegacyError>;

    /// Matching changes, ordered by id.
    fn list_changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeKey>, LegacyError>;

    fn max_change_id(&self) -> Result<Option<ChangeId>, LegacyError>;

    fn label_types(&self) -> Result<Vec<LabelType>, LegacyError>;

    /// Apply `writes` in one transaction: all rows land or none do.
    fn commit(&self, writes: &LegacyWrites) -> Result<(), LegacyError>;
}
