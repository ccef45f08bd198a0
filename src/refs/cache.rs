//! Read-only ref snapshots.
//!
//! A cache is scoped to one logical operation over one repository. The first
//! read of a name (or prefix) hits the ref database; every later read inside
//! the same operation sees that value, even if another writer moves the ref in
//! the meantime.

use std::cell::RefCell;
use std::collections::BTreeMap;

use git2::{ErrorCode, Oid, Repository};

use crate::core::RepoName;

/// Snapshot read access to one repository's refs.
pub trait RefCache {
    /// Current value of `name`, or `None` if absent.
    fn get(&self, name: &str) -> Result<Option<Oid>, git2::Error>;

    /// Every direct ref whose name starts with `prefix`, sorted by name.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Oid)>, git2::Error>;
}

/// Read a ref, mapping "not found" to `None`.
pub fn read_ref(repo: &Repository, name: &str) -> Result<Option<Oid>, git2::Error> {
    match repo.refname_to_id(name) {
        Ok(oid) => Ok(Some(oid)),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// List direct refs under `prefix` straight from the ref database.
///
/// Ref names cannot hold glob metacharacters, so the glob only narrows the
/// walk to `prefix`.
pub fn list_prefix(repo: &Repository, prefix: &str) -> Result<Vec<(String, Oid)>, git2::Error> {
    let mut out = Vec::new();
    for reference in repo.references_glob(&format!("{prefix}*"))? {
        let reference = reference?;
        let Some(name) = reference.name() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        if let Some(oid) = reference.target() {
            out.push((name.to_string(), oid));
        }
    }
    out.sort();
    Ok(out)
}

#[derive(Default)]
struct Memo {
    names: BTreeMap<String, Option<Oid>>,
    prefixes: BTreeMap<String, Vec<(String, Oid)>>,
}

impl Memo {
    fn covered(&self, name: &str) -> Option<Option<Oid>> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, refs)| {
                refs.iter()
                    .find(|(candidate, _)| candidate == name)
                    .map(|(_, oid)| *oid)
            })
    }
}

/// Memoizing cache over a live repository.
pub struct RepoRefCache<'r> {
    repo: &'r Repository,
    memo: RefCell<Memo>,
}

impl<'r> RepoRefCache<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self {
            repo,
            memo: RefCell::new(Memo::default()),
        }
    }

    pub fn repo(&self) -> &'r Repository {
        self.repo
    }
}

impl RefCache for RepoRefCache<'_> {
    fn get(&self, name: &str) -> Result<Option<Oid>, git2::Error> {
        if let Some(hit) = self.memo.borrow().names.get(name) {
            return Ok(*hit);
        }
        let covered = self.memo.borrow().covered(name);
        let value = match covered {
            Some(value) => value,
            None => read_ref(self.repo, name)?,
        };
        self.memo.borrow_mut().names.insert(name.to_string(), value);
        Ok(value)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Oid)>, git2::Error> {
        if let Some(hit) = self.memo.borrow().prefixes.get(prefix) {
            return Ok(hit.clone());
        }
        let mut refs = list_prefix(self.repo, prefix)?;
        {
            // Names already observed individually keep their first value.
            let memo = self.memo.borrow();
            refs.retain(|(name, _)| !matches!(memo.names.get(name), Some(None)));
            for (name, value) in memo.names.iter() {
                if let Some(oid) = value
                    && name.starts_with(prefix)
                {
                    match refs.iter_mut().find(|(candidate, _)| candidate == name) {
                        Some(entry) => entry.1 = *oid,
                        None => refs.push((name.clone(), *oid)),
                    }
                }
            }
        }
        refs.sort();
        self.memo
            .borrow_mut()
            .prefixes
            .insert(prefix.to_string(), refs.clone());
        Ok(refs)
    }
}

/// Fixed in-memory snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotRefCache {
    refs: BTreeMap<String, Oid>,
}

impl SnapshotRefCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, oid: Oid) -> Self {
        self.refs.insert(name.into(), oid);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, oid: Oid) {
        self.refs.insert(name.into(), oid);
    }

    pub fn remove(&mut self, name: &str) {
        self.refs.remove(name);
    }
}

impl RefCache for SnapshotRefCache {
    fn get(&self, name: &str) -> Result<Option<Oid>, git2::Error> {
        Ok(self.refs.get(name).copied())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Oid)>, git2::Error> {
        Ok(self
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, oid)| (name.clone(), *oid))
            .collect())
    }
}

/// One cache per repository, keyed by name.
#[derive(Default)]
pub struct RefCaches<'a> {
    by_repo: BTreeMap<RepoName, &'a dyn RefCache>,
}

impl<'a> RefCaches<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, repo: RepoName, cache: &'a dyn RefCache) -> Self {
        self.by_repo.insert(repo, cache);
        self
    }

    pub fn insert(&mut self, repo: RepoName, cache: &'a dyn RefCache) {
        self.by_repo.insert(repo, cache);
    }

    pub fn get(&self, repo: &RepoName) -> Option<&'a dyn RefCache> {
        self.by_repo.get(repo).copied()
    }
}
