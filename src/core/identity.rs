//! Layer 1: Identity atoms
//!
//! RepoName: repository (project) a change lives in
//! ChangeId / AccountId / PatchSetId: positive integer keys from the legacy store
//! ChangeKey: repository + change id, the identity used in reports and logs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidId};

/// Repository name, e.g. `platform/build`.
///
/// Must be non-empty, must not start or end with `/`, and must not contain a
/// `..` component or a `.git` suffix (the on-disk directory adds that).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// Holds per-account refs such as draft comments.
    pub const ALL_USERS: &'static str = "All-Users";
    /// Holds site-wide refs such as the change id sequence.
    pub const ALL_PROJECTS: &'static str = "All-Projects";

    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let reason = if raw.is_empty() {
            Some("empty")
        } else if raw.starts_with('/') || raw.ends_with('/') {
            Some("leading or trailing slash")
        } else if raw.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            Some("empty or relative path component")
        } else if raw.ends_with(".git") {
            Some("must not end in .git")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(InvalidId::Repo {
                raw,
                reason: reason.into(),
            }
            .into()),
            None => Ok(Self(raw)),
        }
    }

    pub fn all_users() -> Self {
        Self(Self::ALL_USERS.to_string())
    }

    pub fn all_projects() -> Self {
        Self(Self::ALL_PROJECTS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepoName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepoName> for String {
    fn from(value: RepoName) -> Self {
        value.0
    }
}

impl FromStr for RepoName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoName({:?})", self.0)
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! positive_id {
    ($name:ident, $variant:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(try_from = "u32", into = "u32")]
        pub struct $name(u32);

        impl $name {
            pub fn new(value: u32) -> Result<Self, CoreError> {
                if value == 0 {
                    Err(InvalidId::$variant {
                        raw: value.to_string(),
                        reason: "must be positive".into(),
                    }
                    .into())
                } else {
                    Ok(Self(value))
                }
            }

            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl TryFrom<u32> for $name {
            type Error = CoreError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s.trim().parse::<u32>().map_err(|err| InvalidId::$variant {
                    raw: s.to_string(),
                    reason: err.to_string(),
                })?;
                Self::new(value)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

positive_id!(ChangeId, Change, "Legacy change number.");
positive_id!(AccountId, Account, "Legacy account number.");
positive_id!(PatchSetId, PatchSet, "Patch set number within one change, starting at 1.");

/// Repository + change id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeKey {
    pub repo: RepoName,
    pub id: ChangeId,
}

impl ChangeKey {
    pub fn new(repo: RepoName, id: ChangeId) -> Self {
        Self { repo, id }
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.repo, self.id)
    }
}

/// Parse a hex object id.
pub fn parse_oid(raw: &str) -> Result<git2::Oid, CoreError> {
    if raw.len() != 40 {
        return Err(InvalidId::Object {
            raw: raw.to_string(),
            reason: "expected 40 hex characters".into(),
        }
        .into());
    }
    git2::Oid::from_str(raw).map_err(|err| {
        InvalidId::Object {
            raw: raw.to_string(),
            reason: err.message().to_string(),
        }
        .into()
    })
}
