//! Pending ref updates layered over a live snapshot.

use std::cell::RefCell;
use std::collections::BTreeMap;

use git2::{Oid, Repository};

use crate::core::RepoName;

use super::cache::{RefCache, RepoRefCache};
use super::update::RefUpdate;

/// One repository as seen from inside a transaction.
///
/// Reads return staged values where a ref has been staged and the snapshot
/// value otherwise. Staging a ref twice keeps the snapshot value as the
/// expected-old and replaces the new value.
pub struct StagedRefView<'r> {
    name: RepoName,
    live: RepoRefCache<'r>,
    staged: RefCell<BTreeMap<String, RefUpdate>>,
}

impl<'r> StagedRefView<'r> {
    pub fn new(name: RepoName, repo: &'r Repository) -> Self {
        Self {
            name,
            live: RepoRefCache::new(repo),
            staged: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &RepoName {
        &self.name
    }

    pub fn repo(&self) -> &'r Repository {
        self.live.repo()
    }

    /// The snapshot without staged values.
    pub fn live(&self) -> &RepoRefCache<'r> {
        &self.live
    }

    pub fn stage(&self, name: &str, new: Option<Oid>) -> Result<(), git2::Error> {
        if let Some(update) = self.staged.borrow_mut().get_mut(name) {
            update.new = new;
            return Ok(());
        }
        let old = self.live.get(name)?;
        self.staged.borrow_mut().insert(
            name.to_string(),
            RefUpdate::new(self.name.clone(), name, old, new),
        );
        Ok(())
    }

    /// Staged updates in ref-name order, no-ops included.
    pub fn updates(&self) -> Vec<RefUpdate> {
        self.staged.borrow().values().cloned().collect()
    }

    pub fn has_updates(&self) -> bool {
        self.staged.borrow().values().any(|u| !u.is_noop())
    }
}

impl RefCache for StagedRefView<'_> {
    fn get(&self, name: &str) -> Result<Option<Oid>, git2::Error> {
        if let Some(update) = self.staged.borrow().get(name) {
            return Ok(update.new);
        }
        self.live.get(name)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Oid)>, git2::Error> {
        let mut refs: BTreeMap<String, Oid> = self.live.scan_prefix(prefix)?.into_iter().collect();
        for (name, update) in self.staged.borrow().iter() {
            if !name.starts_with(prefix) {
                continue;
            }
            match update.new {
                Some(oid) => {
                    refs.insert(name.clone(), oid);
                }
                None => {
                    refs.remove(name);
                }
            }
        }
        Ok(refs.into_iter().collect())
    }
}
