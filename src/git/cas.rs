//! Atomic multi-ref compare-and-swap within one repository.
//!
//! All refs are locked first, then every expected value is checked against the
//! live ref database, and only then are the new values written. A mismatch
//! drops the transaction, which releases the locks without writing anything.

use git2::{ErrorCode, Repository, Signature};

use crate::core::RepoName;
use crate::refs::{RefUpdate, read_ref};

use super::error::{GitError, RefConflictError};

/// Apply `updates` to `repo` as one unit. Returns the number of refs written.
///
/// No-op updates (`expected_old == new`) are still verified but not written.
/// Every update must name `repo_name`; duplicates of one ref are rejected.
pub fn apply_atomic(
    repo: &Repository,
    repo_name: &RepoName,
    updates: &[RefUpdate],
    sig: &Signature<'_>,
    message: &str,
) -> Result<usize, GitError> {
    if updates.is_empty() {
        return Ok(0);
    }
    let mut seen = std::collections::BTreeSet::new();
    for update in updates {
        debug_assert_eq!(&update.repo, repo_name, "update routed to wrong repository");
        if !seen.insert(update.name.as_str()) {
            return Err(GitError::RefTransaction {
                repo: repo_name.clone(),
                source: git2::Error::from_str(&format!("duplicate update for {}", update.name)),
            });
        }
    }

    let mut tx = repo.transaction()?;
    for update in updates {
        tx.lock_ref(&update.name).map_err(|err| lock_error(repo_name, &update.name, err))?;
    }

    for update in updates {
        let actual = read_ref(repo, &update.name)?;
        if actual != update.expected_old {
            return Err(RefConflictError {
                repo: repo_name.clone(),
                name: update.name.clone(),
                expected: update.expected_old,
                actual,
            }
            .into());
        }
    }

    let mut written = 0;
    for update in updates.iter().filter(|u| !u.is_noop()) {
        match update.new {
            Some(oid) => tx.set_target(&update.name, oid, Some(sig), message)?,
            None => tx.remove(&update.name)?,
        }
        written += 1;
    }
    if written == 0 {
        return Ok(0);
    }
    tx.commit().map_err(|source| GitError::RefTransaction {
        repo: repo_name.clone(),
        source,
    })?;
    tracing::debug!(repo = %repo_name, refs = written, "applied ref updates");
    Ok(written)
}

fn lock_error(repo: &RepoName, name: &str, err: git2::Error) -> GitError {
    if err.code() == ErrorCode::Locked {
        GitError::Locked {
            repo: repo.clone(),
            name: name.to_string(),
        }
    } else {
        GitError::Git(err)
    }
}
