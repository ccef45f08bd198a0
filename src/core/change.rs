//! The legacy change row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::InvalidStatus;
use super::identity::{AccountId, ChangeId, ChangeKey, PatchSetId, RepoName};
use super::time::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::New => "new",
            ChangeStatus::Merged => "merged",
            ChangeStatus::Abandoned => "abandoned",
        }
    }
}

impl FromStr for ChangeStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ChangeStatus::New),
            "merged" => Ok(ChangeStatus::Merged),
            "abandoned" => Ok(ChangeStatus::Abandoned),
            other => Err(InvalidStatus {
                raw: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projection of one row in the legacy `changes` table.
///
/// `note_db_state` carries the serialized [`crate::state::ChangeState`]
/// verbatim; `row_version` is bumped by every legacy write and guards
/// concurrent writers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub id: ChangeId,
    pub repo: RepoName,
    pub branch: String,
    pub subject: String,
    pub owner: AccountId,
    pub status: ChangeStatus,
    pub current_patch_set: Option<PatchSetId>,
    pub created_on: Timestamp,
    pub last_updated_on: Timestamp,
    pub note_db_state: Option<String>,
    pub row_version: u64,
}

impl Change {
    pub fn key(&self) -> ChangeKey {
        ChangeKey::new(self.repo.clone(), self.id)
    }
}
