//! Domain events: the mutation vocabulary of the notes store.
//!
//! The rebuilder derives them from legacy rows; live writes record them
//! directly. Applying an event to a [`ChangeNotesState`] is the only way the
//! projection changes, and every event renders its own commit trailer.

use crate::core::{AccountId, ChangeStatus, PatchSetId, Timestamp};
use crate::state::PrimaryStorage;

use super::projection::{
    ApprovalNote, ChangeNotesState, CommentNote, DraftsState, MessageNote, PatchSetNote,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    CreateChange {
        branch: String,
        subject: String,
        owner: AccountId,
    },
    PatchSetCreated {
        revision: String,
    },
    StatusChanged {
        status: ChangeStatus,
    },
    Message {
        uuid: String,
        text: String,
    },
    VoteCast {
        label: String,
        value: i16,
    },
    /// A vote explicitly deleted (legacy value 0).
    VoteRemoved {
        label: String,
    },
    /// Reviewer on a label without a score (legacy value NULL).
    NoVote {
        label: String,
    },
    CommentPublished {
        uuid: String,
        file: String,
        line: Option<u32>,
        text: String,
    },
    /// Routed to the author's draft ref, never to the meta ref.
    DraftComment {
        uuid: String,
        file: String,
        line: Option<u32>,
        text: String,
    },
    HashtagAdded {
        hashtag: String,
    },
    /// Reconciles fields the row history cannot explain with the final row.
    FinalUpdates {
        subject: String,
        status: ChangeStatus,
        current_patch_set: Option<PatchSetId>,
    },
    PrimaryStorageSet {
        primary: PrimaryStorage,
    },
}

impl EventKind {
    /// Tie-break rank for events sharing a timestamp.
    pub fn rank(&self) -> u8 {
        match self {
            EventKind::CreateChange { .. } => 0,
            EventKind::PatchSetCreated { .. } => 1,
            EventKind::VoteCast { .. } | EventKind::VoteRemoved { .. } | EventKind::NoVote { .. } => 2,
            EventKind::HashtagAdded { .. } => 3,
            EventKind::CommentPublished { .. } | EventKind::DraftComment { .. } => 4,
            EventKind::Message { .. } => 5,
            EventKind::StatusChanged { .. } => 6,
            EventKind::FinalUpdates { .. } => 7,
            EventKind::PrimaryStorageSet { .. } => 8,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, EventKind::DraftComment { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// `None` for the server itself.
    pub who: Option<AccountId>,
    pub when: Timestamp,
    pub patch_set: Option<PatchSetId>,
    /// Legacy row id (or 0 for synthesized events); second sort key.
    pub row_id: i64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(who: Option<AccountId>, when: Timestamp, kind: EventKind) -> Self {
        Self {
            who,
            when,
            patch_set: None,
            row_id: 0,
            kind,
        }
    }

    pub fn on_patch_set(mut self, patch_set: Option<PatchSetId>) -> Self {
        self.patch_set = patch_set;
        self
    }

    pub fn with_row_id(mut self, row_id: i64) -> Self {
        self.row_id = row_id;
        self
    }

    pub fn sort_key(&self) -> (Timestamp, u8, i64) {
        (self.when, self.kind.rank(), self.row_id)
    }

    /// Fold this event into `state`.
    pub fn apply(&self, state: &mut ChangeNotesState) {
        if self.when > state.last_updated_on {
            state.last_updated_on = self.when;
        }
        match &self.kind {
            EventKind::CreateChange {
                branch,
                subject,
                owner,
            } => {
                state.branch = branch.clone();
                state.subject = subject.clone();
                state.owner = Some(*owner);
                state.status = ChangeStatus::New;
                state.created_on = self.when;
            }
            EventKind::PatchSetCreated { revision } => {
                if let (Some(id), Some(uploader)) = (self.patch_set, self.who)
                    && !state.has_patch_set(id)
                {
                    state.patch_sets.push(PatchSetNote {
                        id,
                        revision: revision.clone(),
                        uploader,
                        created_on: self.when,
                    });
                    state.patch_sets.sort_by_key(|ps| ps.id);
                    state.current_patch_set = state.patch_sets.last().map(|ps| ps.id);
                }
            }
            EventKind::StatusChanged { status } => state.status = *status,
            EventKind::Message { uuid, text } => state.messages.push(MessageNote {
                uuid: uuid.clone(),
                author: self.who,
                written_on: self.when,
                patch_set: self.patch_set,
                message: text.clone(),
            }),
            EventKind::VoteCast { label, value } => {
                if let (Some(account), Some(patch_set)) = (self.who, self.patch_set) {
                    state.reviewers.insert(account);
                    state.upsert_approval(ApprovalNote {
                        patch_set,
                        label: label.clone(),
                        account,
                        value: *value,
                        granted: self.when,
                    });
                }
            }
            EventKind::VoteRemoved { label } => {
                if let (Some(account), Some(patch_set)) = (self.who, self.patch_set) {
                    state.reviewers.insert(account);
                    state.remove_approval(patch_set, label, account);
                }
            }
            EventKind::NoVote { .. } => {
                if let Some(account) = self.who {
                    state.reviewers.insert(account);
                }
            }
            EventKind::CommentPublished {
                uuid,
                file,
                line,
                text,
            } => {
                if let (Some(author), Some(patch_set)) = (self.who, self.patch_set) {
                    state.comments.push(CommentNote {
                        uuid: uuid.clone(),
                        patch_set,
                        author,
                        written_on: self.when,
                        file: file.clone(),
                        line: *line,
                        message: text.clone(),
                    });
                }
            }
            EventKind::HashtagAdded { hashtag } => {
                state.hashtags.insert(hashtag.clone());
            }
            EventKind::FinalUpdates {
                subject,
                status,
                current_patch_set,
            } => {
                state.subject = subject.clone();
                state.status = *status;
                state.current_patch_set = *current_patch_set;
            }
            EventKind::DraftComment { .. } | EventKind::PrimaryStorageSet { .. } => {}
        }
    }

    /// Fold a draft event into its author's drafts. Other kinds are ignored.
    pub fn apply_draft(&self, drafts: &mut DraftsState) {
        if let EventKind::DraftComment {
            uuid,
            file,
            line,
            text,
        } = &self.kind
            && let Some(patch_set) = self.patch_set
        {
            drafts.comments.push(CommentNote {
                uuid: uuid.clone(),
                patch_set,
                author: drafts.account,
                written_on: self.when,
                file: file.clone(),
                line: *line,
                message: text.clone(),
            });
        }
    }

    /// Commit message trailer for this event, if any.
    pub fn trailer(&self) -> Option<String> {
        let by = self
            .who
            .map(|who| format!(" by {who}"))
            .unwrap_or_default();
        match &self.kind {
            EventKind::CreateChange { branch, .. } => Some(format!("Branch: {branch}")),
            EventKind::PatchSetCreated { revision } => Some(format!("Commit: {revision}")),
            EventKind::StatusChanged { status } => Some(format!("Status: {status}")),
            EventKind::VoteCast { label, value } => {
                Some(format!("Label-Value: {label}={}{by}", format_vote(*value)))
            }
            EventKind::VoteRemoved { label } => Some(format!("Label-Value: -{label}{by}")),
            EventKind::NoVote { .. } => self.who.map(|who| format!("Reviewer: {who}")),
            EventKind::HashtagAdded { hashtag } => Some(format!("Hashtag-Added: {hashtag}")),
            EventKind::FinalUpdates { status, .. } => Some(format!("Status: {status}")),
            EventKind::PrimaryStorageSet { primary } => Some(format!("Primary-Storage: {primary}")),
            EventKind::Message { .. }
            | EventKind::CommentPublished { .. }
            | EventKind::DraftComment { .. } => None,
        }
    }
}

/// `+2`, `-1`, `0`.
pub fn format_vote(value: i16) -> String {
    if value > 0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}
