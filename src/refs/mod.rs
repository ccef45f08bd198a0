//! Ref snapshots, ref-update requests and ref naming.

pub mod cache;
pub mod names;
pub mod staged;
pub mod update;

pub use cache::{RefCache, RefCaches, RepoRefCache, SnapshotRefCache, list_prefix, read_ref};
pub use names::{SEQUENCE_CHANGES, draft_prefix, draft_ref, meta_ref, parse_draft_ref};
pub use staged::StagedRefView;
pub use update::RefUpdate;
