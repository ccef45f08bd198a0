//! Notes store format.
//!
//! - `projection`: full change state stored in every meta commit
//! - `event`: domain events that mutate the projection
//! - `commit`: signatures, messages and commit writing
//! - `reader`: commit → projection

pub mod commit;
pub mod error;
pub mod event;
pub mod projection;
pub mod reader;

pub use commit::{
    ServerIdent, change_commit_message, drafts_commit_message, trailer_value, write_change_commit,
    write_drafts_commit,
};
pub use error::NotesError;
pub use event::{Event, EventKind, format_vote};
pub use projection::{
    ApprovalNote, CHANGE_FILE, ChangeNotesState, CommentNote, DRAFTS_FILE, DraftsState,
    MessageNote, PatchSetNote,
};
pub use reader::{primary_marker, read_change_state, read_drafts_state};
