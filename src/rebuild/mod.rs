//! Deterministic legacy → notes conversion.
//!
//! A rebuild reads every legacy row of one change, derives domain events,
//! groups them into buckets and writes one commit per bucket on the meta ref
//! (and on per-author draft refs for unpublished comments). Objects are
//! inserted but no ref moves: the caller applies [`RebuildResult::ref_updates`]
//! through a compare-and-swap.
//!
//! Same rows in, same object ids out. Nothing here reads the wall clock.

mod bucket;
mod convert;
mod error;

pub use bucket::{Bucket, MAX_DELTA_MS, MAX_WINDOW_MS, bucket_events};
pub use error::{CorruptLegacyDataError, RebuildError};

use std::collections::BTreeMap;

use git2::{Oid, Repository};

use crate::core::{AccountId, ChangeBundle, ChangeId, ChangeKey, RepoName};
use crate::git::RepoManager;
use crate::legacy::{LegacyError, LegacyStore};
use crate::notes::{
    ChangeNotesState, DraftsState, Event, NotesError, ServerIdent, change_commit_message,
    drafts_commit_message, read_change_state, write_change_commit, write_drafts_commit,
};
use crate::refs::{
    RefCache, RefCaches, RefUpdate, RepoRefCache, draft_prefix, draft_ref, meta_ref,
    parse_draft_ref,
};
use crate::state::{ChangeState, PrimaryStorage, RefState, StateError};

/// Everything a rebuild produced. Objects exist; refs are untouched.
#[derive(Clone, Debug)]
pub struct RebuildResult {
    pub change: ChangeKey,
    pub events: Vec<Event>,
    pub meta_commits: Vec<Oid>,
    pub draft_commits: BTreeMap<AccountId, Vec<Oid>>,
    /// Only refs whose value changes; expected-old is the live value read.
    pub ref_updates: Vec<RefUpdate>,
    pub new_ref_state: RefState,
    pub projection: ChangeNotesState,
}

impl RebuildResult {
    pub fn meta_tip(&self) -> Option<Oid> {
        self.meta_commits.last().copied()
    }

    /// The live refs already hold exactly this result.
    pub fn is_noop(&self) -> bool {
        self.ref_updates.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotesSource {
    /// Parsed from the meta ref tip.
    Stored,
    /// Rebuilt in memory from legacy rows; refs were not touched.
    Rebuilt,
}

#[derive(Clone, Debug)]
pub struct LoadedNotes {
    pub state: ChangeNotesState,
    pub source: NotesSource,
}

#[derive(Clone, Debug, Default)]
pub struct Rebuilder {
    ident: ServerIdent,
}

impl Rebuilder {
    pub fn new(ident: ServerIdent) -> Self {
        Self { ident }
    }

    pub fn ident(&self) -> &ServerIdent {
        &self.ident
    }

    /// Read the change's rows and rebuild against live refs.
    pub fn rebuild(
        &self,
        legacy: &dyn LegacyStore,
        repos: &RepoManager,
        id: ChangeId,
    ) -> Result<RebuildResult, RebuildError> {
        let bundle = legacy.read_bundle(id)?;
        let change_repo = repos.open(&bundle.change.repo)?;
        let all_users = repos.open(&RepoName::all_users())?;
        let change_cache = RepoRefCache::new(&change_repo);
        let users_cache = RepoRefCache::new(&all_users);
        let caches = RefCaches::new()
            .with(bundle.change.repo.clone(), &change_cache)
            .with(RepoName::all_users(), &users_cache);
        self.build(&bundle, &change_repo, &all_users, &caches)
    }

    /// Core conversion. `caches` must cover the change's repository and
    /// `All-Users`; their values become the expected-old of each update.
    ///
    /// A change without patch sets is refused.
    pub fn build(
        &self,
        bundle: &ChangeBundle,
        change_repo: &Repository,
        all_users: &Repository,
        caches: &RefCaches<'_>,
    ) -> Result<RebuildResult, RebuildError> {
        if bundle.patch_sets.is_empty() {
            return Err(RebuildError::NoPatchSets(bundle.change.key()));
        }
        self.build_inner(bundle, change_repo, all_users, caches)
    }

    /// Like [`Rebuilder::build`], but a change without patch sets gets a
    /// chain holding only what its rows record. Used when the change must
    /// leave legacy storage regardless.
    pub fn build_allowing_empty(
        &self,
        bundle: &ChangeBundle,
        change_repo: &Repository,
        all_users: &Repository,
        caches: &RefCaches<'_>,
    ) -> Result<RebuildResult, RebuildError> {
        self.build_inner(bundle, change_repo, all_users, caches)
    }

    fn build_inner(
        &self,
        bundle: &ChangeBundle,
        change_repo: &Repository,
        all_users: &Repository,
        caches: &RefCaches<'_>,
    ) -> Result<RebuildResult, RebuildError> {
        let change = &bundle.change;
        let key = change.key();
        if ChangeState::effective(change).primary() == PrimaryStorage::Notes {
            return Err(RebuildError::NotesPrimary(key));
        }

        let events = convert::collect_events(bundle)?;
        let (drafts, meta_events): (Vec<Event>, Vec<Event>) =
            events.iter().cloned().partition(|e| e.kind.is_draft());

        let mut projection = ChangeNotesState::empty(change.repo.clone(), change.id);
        let meta_commits = write_meta_buckets(
            change_repo,
            &self.ident,
            None,
            &mut projection,
            &bucket_events(meta_events),
        )?;

        let mut by_author: BTreeMap<AccountId, Vec<Event>> = BTreeMap::new();
        for event in drafts {
            if let Some(author) = event.who {
                by_author.entry(author).or_default().push(event);
            }
        }
        let mut draft_commits = BTreeMap::new();
        for (account, events) in by_author {
            let mut drafts = DraftsState {
                change_id: change.id,
                account,
                comments: Vec::new(),
            };
            let commits = write_draft_buckets(
                all_users,
                &self.ident,
                None,
                &mut drafts,
                &bucket_events(events),
            )?;
            draft_commits.insert(account, commits);
        }

        let users = RepoName::all_users();
        let change_cache = cache_for(caches, &change.repo)?;
        let users_cache = cache_for(caches, &users)?;

        let mut ref_updates = Vec::new();
        let mut new_ref_state = RefState::new();

        let meta = meta_ref(change.id);
        let meta_tip = meta_commits.last().copied();
        push_update(
            &mut ref_updates,
            RefUpdate::new(change.repo.clone(), meta.clone(), change_cache.get(&meta)?, meta_tip),
        );
        new_ref_state.set(&change.repo, meta, meta_tip);

        for (account, commits) in &draft_commits {
            let name = draft_ref(change.id, *account);
            let tip = commits.last().copied();
            push_update(
                &mut ref_updates,
                RefUpdate::new(users.clone(), name.clone(), users_cache.get(&name)?, tip),
            );
            new_ref_state.set(&users, name, tip);
        }
        for (name, old) in users_cache.scan_prefix(&draft_prefix(change.id))? {
            let stale = parse_draft_ref(change.id, &name)
                .is_none_or(|account| !draft_commits.contains_key(&account));
            if stale {
                tracing::debug!(change = %key, draft_ref = %name, "deleting stale draft ref");
                ref_updates.push(RefUpdate::new(users.clone(), name, Some(old), None));
            }
        }

        tracing::debug!(
            change = %key,
            events = events.len(),
            commits = meta_commits.len(),
            updates = ref_updates.len(),
            "rebuilt change"
        );
        Ok(RebuildResult {
            change: key,
            events,
            meta_commits,
            draft_commits,
            ref_updates,
            new_ref_state,
            projection,
        })
    }

    /// Current projection of a change for readers.
    ///
    /// A stale legacy-primary change is rebuilt in memory; a stale
    /// notes-primary change is an error since its rows are no longer
    /// authoritative.
    pub fn load(
        &self,
        legacy: &dyn LegacyStore,
        repos: &RepoManager,
        id: ChangeId,
    ) -> Result<LoadedNotes, RebuildError> {
        let change = legacy.read_change(id)?.ok_or(LegacyError::NoSuchChange(id))?;
        let key = change.key();
        let state = ChangeState::effective(&change);

        let change_repo = repos.open(&change.repo)?;
        let all_users = repos.open(&RepoName::all_users())?;
        let change_cache = RepoRefCache::new(&change_repo);
        let users_cache = RepoRefCache::new(&all_users);
        let caches = RefCaches::new()
            .with(change.repo.clone(), &change_cache)
            .with(RepoName::all_users(), &users_cache);

        if state.is_up_to_date(&key, &caches)?
            && let Some(tip) = change_cache.get(&meta_ref(id))?
        {
            return Ok(LoadedNotes {
                state: read_change_state(&change_repo, tip)?,
                source: NotesSource::Stored,
            });
        }
        if state.primary() == PrimaryStorage::Notes {
            return Err(RebuildError::StaleNotesPrimary(key));
        }

        tracing::info!(change = %key, "notes copy stale; rebuilding for read");
        let bundle = legacy.read_bundle(id)?;
        let result = self.build(&bundle, &change_repo, &all_users, &caches)?;
        Ok(LoadedNotes {
            state: result.projection,
            source: NotesSource::Rebuilt,
        })
    }
}

fn cache_for<'a>(caches: &RefCaches<'a>, repo: &RepoName) -> Result<&'a dyn RefCache, StateError> {
    caches
        .get(repo)
        .ok_or_else(|| StateError::MissingRefCache(repo.clone()))
}

fn push_update(updates: &mut Vec<RefUpdate>, update: RefUpdate) {
    if !update.is_noop() {
        updates.push(update);
    }
}

/// Append one commit per bucket to the chain starting at `parent`.
///
/// `state` is the projection at `parent` and is advanced in place.
pub fn write_meta_buckets(
    repo: &Repository,
    ident: &ServerIdent,
    parent: Option<Oid>,
    state: &mut ChangeNotesState,
    buckets: &[Bucket],
) -> Result<Vec<Oid>, NotesError> {
    let mut parent = parent;
    let mut commits = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        for event in &bucket.events {
            event.apply(state);
        }
        let patch_set = bucket
            .events
            .iter()
            .rev()
            .find_map(|e| e.patch_set)
            .or(state.current_patch_set);
        let message = change_commit_message(&bucket.events, patch_set);
        let when = bucket.when();
        let oid = write_change_commit(
            repo,
            parent,
            state,
            &message,
            &ident.author(bucket.who, when)?,
            &ident.committer(when)?,
        )?;
        commits.push(oid);
        parent = Some(oid);
    }
    Ok(commits)
}

pub fn write_draft_buckets(
    repo: &Repository,
    ident: &ServerIdent,
    parent: Option<Oid>,
    drafts: &mut DraftsState,
    buckets: &[Bucket],
) -> Result<Vec<Oid>, NotesError> {
    let mut parent = parent;
    let mut commits = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        for event in &bucket.events {
            event.apply_draft(drafts);
        }
        let patch_set = bucket.events.iter().rev().find_map(|e| e.patch_set);
        let when = bucket.when();
        let oid = write_drafts_commit(
            repo,
            parent,
            drafts,
            &drafts_commit_message(patch_set),
            &ident.author(bucket.who, when)?,
            &ident.committer(when)?,
        )?;
        commits.push(oid);
        parent = Some(oid);
    }
    Ok(commits)
}
