//! Domain atoms shared by every layer.

pub mod change;
pub mod error;
pub mod identity;
pub mod json_canon;
pub mod rows;
pub mod time;

pub use change::{Change, ChangeStatus};
pub use error::{CoreError, InvalidId, InvalidStatus};
pub use identity::{AccountId, ChangeId, ChangeKey, PatchSetId, RepoName, parse_oid};
pub use json_canon::{CanonJsonError, to_canon_json_bytes, to_canon_json_string};
pub use rows::{
    ApprovalRow, ChangeBundle, CommentRow, CommentStatus, HashtagRow, LabelType, MessageRow,
    PatchSetRow,
};
pub use time::Timestamp;
