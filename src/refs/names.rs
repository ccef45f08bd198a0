//! Ref naming for change metadata.
//!
//! - meta ref: `refs/changes/<NN>/<id>/meta` in the change's repository
//! - draft ref: `refs/draft-comments/<NN>/<id>/<account>` in `All-Users`
//! - change sequence: `refs/sequences/changes` in `All-Projects`
//!
//! `NN` is the last two digits of the change id, zero padded.

use crate::core::{AccountId, ChangeId};

pub const SEQUENCE_CHANGES: &str = "refs/sequences/changes";

fn shard(id: ChangeId) -> String {
    format!("{:02}", id.get() % 100)
}

pub fn meta_ref(id: ChangeId) -> String {
    format!("refs/changes/{}/{}/meta", shard(id), id)
}

/// Prefix under which every draft ref for `id` lives; ends with `/`.
pub fn draft_prefix(id: ChangeId) -> String {
    format!("refs/draft-comments/{}/{}/", shard(id), id)
}

pub fn draft_ref(id: ChangeId, account: AccountId) -> String {
    format!("{}{}", draft_prefix(id), account)
}

/// Inverse of [`draft_ref`] for a known change.
pub fn parse_draft_ref(id: ChangeId, name: &str) -> Option<AccountId> {
    let rest = name.strip_prefix(&draft_prefix(id))?;
    rest.parse().ok()
}
