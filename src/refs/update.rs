use std::fmt;

use git2::Oid;

use crate::core::RepoName;

/// One compare-and-swap request against a ref.
///
/// `None` stands for "absent": an absent `expected_old` means the ref must
/// not exist yet, an absent `new` deletes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefUpdate {
    pub repo: RepoName,
    pub name: String,
    pub expected_old: Option<Oid>,
    pub new: Option<Oid>,
}

impl RefUpdate {
    pub fn new(
        repo: RepoName,
        name: impl Into<String>,
        expected_old: Option<Oid>,
        new: Option<Oid>,
    ) -> Self {
        Self {
            repo,
            name: name.into(),
            expected_old,
            new,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.expected_old == self.new
    }

    /// The update that undoes this one once it has been applied.
    pub fn inverse(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            name: self.name.clone(),
            expected_old: self.new,
            new: self.expected_old,
        }
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} -> {}",
            self.repo,
            self.name,
            fmt_oid(&self.expected_old),
            fmt_oid(&self.new)
        )
    }
}

pub(crate) fn fmt_oid(oid: &Option<Oid>) -> String {
    match oid {
        Some(oid) => oid.to_string(),
        None => "(absent)".to_string(),
    }
}
