//! Site-wide legacy → notes migration.
//!
//! The migrator walks the site through [`MigrationPhase`]s one step at a time,
//! running the pass each step needs and persisting the new phase only when
//! that pass left nothing behind:
//!
//! | step                           | pass                                     |
//! |--------------------------------|------------------------------------------|
//! | Off → Write                    | none; writers start dual-writing         |
//! | Write → ReadWrite              | bulk rebuild, zero failures required     |
//! | → ReadWriteNoSequence          | promotion guard                          |
//! | → Trial                        | promotion guard, seed change sequence    |
//! | Trial → ForceReadWrite         | promotion guard                          |
//! | ForceReadWrite → NotesPrimary  | flip every change under a lease          |
//!
//! The promotion guard runs one repair pass over stale legacy-primary changes
//! and refuses to promote if any remain stale.

mod bulk;
mod error;
mod ops;
mod options;
pub mod phase;
mod report;
mod sequence;
mod store;

pub use error::MigrationError;
pub use options::{CancelToken, MigrateOptions, MigratorSettings};
pub use phase::{MigrationPhase, UnknownPhase};
pub use report::{BulkReport, ChangeOutcome, MigrationReport};
pub use sequence::read_sequence;
pub use store::PhaseStore;

use std::collections::BTreeSet;

use git2::{Oid, Repository};

use crate::core::{ChangeId, ChangeKey, RepoName, Timestamp};
use crate::git::RepoManager;
use crate::legacy::{ChangeFilter, LegacyStore};
use crate::rebuild::{LoadedNotes, RebuildError, Rebuilder};
use crate::refs::{RefCache, RefCaches, RepoRefCache, meta_ref};
use crate::site::Site;
use crate::state::{ChangeState, PrimaryStorage};
use crate::update::{BatchUpdate, OpError, TransactionError, retry_on_conflict};

use ops::{LegacyRollbackOp, Lease, LeaseOp, RebuildOp};
use sequence::{AllocateIdOp, SeedSequenceOp};

/// Snapshot of one change's migration status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeCheck {
    pub key: ChangeKey,
    pub primary: PrimaryStorage,
    pub up_to_date: bool,
    pub read_only_until: Option<Timestamp>,
    pub meta_tip: Option<Oid>,
}

pub struct Migrator {
    site: Site,
    phase: MigrationPhase,
    settings: MigratorSettings,
    rebuilder: Rebuilder,
    store: PhaseStore,
}

impl Migrator {
    pub fn new(site: Site, phase: MigrationPhase, settings: MigratorSettings) -> Self {
        let store = PhaseStore::for_site(&site);
        let rebuilder = Rebuilder::new(settings.ident.clone());
        Self {
            site,
            phase,
            settings,
            rebuilder,
            store,
        }
    }

    /// Phase from the site file, settings from the layered config.
    pub fn open(site: Site) -> Result<Self, MigrationError> {
        let config = site.load_config()?;
        let phase = PhaseStore::for_site(&site).load()?;
        Ok(Self::new(site, phase, MigratorSettings::from_config(&config)))
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn settings(&self) -> &MigratorSettings {
        &self.settings
    }

    // =========================================================================
    // Phase loop
    // =========================================================================

    pub fn migrate(
        &mut self,
        options: &MigrateOptions,
        cancel: &CancelToken,
    ) -> Result<MigrationReport, MigrationError> {
        options.validate_full()?;
        let start = self.phase;
        if options.trial && start > MigrationPhase::Trial {
            return Err(MigrationError::TrialPastTrial(start));
        }
        if options.force_rebuild && start > MigrationPhase::Trial {
            return Err(MigrationError::ForceRebuildPastTrial(start));
        }
        let target = options.target();
        let threads = options.threads.unwrap_or(self.settings.threads);
        let span = tracing::info_span!("migrate", from = %start, to = %target, trial = options.trial);
        let _guard = span.enter();

        if options.auto_migrate {
            self.store.set_auto_migrate(true)?;
        }

        let mut report = MigrationReport::new(start);
        // Forced rebuild of a site already past the initial rebuild.
        if options.force_rebuild && start >= MigrationPhase::ReadWrite {
            let bulk = self.bulk(ChangeFilter::All, threads, false, true, cancel)?;
            let clean = bulk.is_clean();
            let failed = bulk.failed.len();
            report.rebuild = Some(bulk);
            if !clean {
                return Err(bulk_error(failed));
            }
        }

        while self.phase < target {
            if cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            let from = self.phase;
            let Some(to) = from.next() else {
                break;
            };
            match to {
                MigrationPhase::Off | MigrationPhase::Write => {}
                MigrationPhase::ReadWrite => {
                    let bulk =
                        self.bulk(ChangeFilter::All, threads, false, options.force_rebuild, cancel)?;
                    let clean = bulk.is_clean();
                    let failed = bulk.failed.len();
                    report.rebuild = Some(bulk);
                    if !clean {
                        return Err(bulk_error(failed));
                    }
                }
                MigrationPhase::ReadWriteNoSequence => {
                    self.promotion_guard(threads, cancel, &mut report)?;
                }
                MigrationPhase::Trial => {
                    self.promotion_guard(threads, cancel, &mut report)?;
                    // A trial site allocates lazily and can still be rolled back.
                    if !options.trial {
                        report.sequence_seeded = Some(self.seed_sequence()?);
                    }
                }
                MigrationPhase::ForceReadWrite => {
                    self.promotion_guard(threads, cancel, &mut report)?;
                    if report.sequence_seeded.is_none() {
                        report.sequence_seeded = Some(self.seed_sequence()?);
                    }
                }
                MigrationPhase::NotesPrimary => {
                    let bulk = self.bulk(ChangeFilter::All, threads, true, false, cancel)?;
                    let clean = bulk.is_clean();
                    let failed = bulk.failed.len();
                    report.flip = Some(bulk);
                    if !clean {
                        return Err(bulk_error(failed));
                    }
                    // Changes created or rolled back during the pass.
                    let remaining = self.legacy_primary_changes()?;
                    if !remaining.is_empty() {
                        return Err(MigrationError::LegacyPrimaryRemain(remaining));
                    }
                }
            }
            self.store.save(from, to)?;
            self.phase = to;
            report.steps.push(to);
            tracing::info!(from = %from, to = %to, "migration phase advanced");
        }

        if self.phase == MigrationPhase::NotesPrimary {
            self.store.set_auto_migrate(false)?;
        }
        report.end_phase = self.phase;
        Ok(report)
    }

    /// Resume a migration left enabled by an earlier `migrate --auto-migrate`.
    pub fn auto_migrate(
        &mut self,
        cancel: &CancelToken,
    ) -> Result<Option<MigrationReport>, MigrationError> {
        let config = self.site.load_config()?;
        if !config.notedb.auto_migrate || self.phase == MigrationPhase::NotesPrimary {
            return Ok(None);
        }
        if config.notedb.trial && self.phase >= MigrationPhase::Trial {
            return Ok(None);
        }
        tracing::info!(phase = %self.phase, "resuming migration");
        let options = MigrateOptions {
            trial: config.notedb.trial,
            ..MigrateOptions::default()
        };
        self.migrate(&options, cancel).map(Some)
    }

    /// Move the phase without running passes.
    ///
    /// Without `force` only a step back that no flipped change depends on is
    /// allowed; moving forward goes through [`Migrator::migrate`].
    pub fn set_phase(&mut self, phase: MigrationPhase, force: bool) -> Result<(), MigrationError> {
        let from = self.phase;
        if from == phase {
            return Ok(());
        }
        let safe = phase < from && from < MigrationPhase::ForceReadWrite;
        if !force && !safe {
            return Err(MigrationError::PhaseChangeRefused { from, to: phase });
        }
        self.store.save(from, phase)?;
        self.phase = phase;
        tracing::warn!(from = %from, to = %phase, force, "migration phase set");
        Ok(())
    }

    /// One repair pass over stale legacy-primary changes; anything still
    /// stale afterwards blocks the promotion.
    fn promotion_guard(
        &self,
        threads: usize,
        cancel: &CancelToken,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        let stale = self.stale_changes()?;
        if stale.is_empty() {
            return Ok(());
        }
        tracing::warn!(count = stale.len(), "stale notes found; running repair pass");
        let ids = stale.iter().map(|key| key.id).collect();
        let repair = self.bulk(ChangeFilter::Changes(ids), threads, false, false, cancel)?;
        let cancelled = repair.cancelled;
        report.repairs.push(repair);
        if cancelled {
            return Err(MigrationError::Cancelled);
        }
        let still = self.stale_changes()?;
        if !still.is_empty() {
            return Err(MigrationError::StaleChanges(still));
        }
        Ok(())
    }

    /// Legacy-primary changes with history whose notes copy is not current.
    pub fn stale_changes(&self) -> Result<Vec<ChangeKey>, MigrationError> {
        let legacy = self.site.open_legacy()?;
        let repos = self.site.repos();
        let mut stale = Vec::new();
        for key in legacy.list_changes(&ChangeFilter::All)? {
            let Some(change) = legacy.read_change(key.id)? else {
                continue;
            };
            let state = ChangeState::effective(&change);
            if state.primary() != PrimaryStorage::Legacy || change.current_patch_set.is_none() {
                continue;
            }
            if !live_up_to_date(&repos, &key, &state)? {
                stale.push(key);
            }
        }
        Ok(stale)
    }

    /// Every change still served from the legacy store.
    pub fn legacy_primary_changes(&self) -> Result<Vec<ChangeKey>, MigrationError> {
        let legacy = self.site.open_legacy()?;
        let mut remaining = Vec::new();
        for key in legacy.list_changes(&ChangeFilter::All)? {
            let Some(change) = legacy.read_change(key.id)? else {
                continue;
            };
            if ChangeState::effective(&change).primary() == PrimaryStorage::Legacy {
                remaining.push(key);
            }
        }
        Ok(remaining)
    }

    // =========================================================================
    // Bulk passes
    // =========================================================================

    /// Rebuild the notes copy of `options`' changes. Never flips.
    pub fn rebuild(
        &self,
        options: &MigrateOptions,
        cancel: &CancelToken,
    ) -> Result<BulkReport, MigrationError> {
        options.validate()?;
        if options.force_rebuild && self.phase > MigrationPhase::Trial {
            return Err(MigrationError::ForceRebuildPastTrial(self.phase));
        }
        let threads = options.threads.unwrap_or(self.settings.threads);
        self.bulk(options.filter(), threads, false, options.force_rebuild, cancel)
    }

    fn bulk(
        &self,
        filter: ChangeFilter,
        threads: usize,
        flip: bool,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<BulkReport, MigrationError> {
        let keys = self.site.open_legacy()?.list_changes(&filter)?;
        tracing::info!(changes = keys.len(), threads, flip, force, "starting bulk pass");
        Ok(bulk::run_bulk(
            keys,
            threads,
            cancel,
            || Ok((self.site.open_legacy()?, self.site.repos())),
            |(legacy, repos), key| self.migrate_change(legacy, repos, key.id, flip, force),
        ))
    }

    // =========================================================================
    // Per change
    // =========================================================================

    /// Bring one change's notes copy up to date and, with `flip`, make it
    /// notes primary.
    pub fn migrate_change(
        &self,
        legacy: &dyn LegacyStore,
        repos: &RepoManager,
        id: ChangeId,
        flip: bool,
        force: bool,
    ) -> Result<ChangeOutcome, MigrationError> {
        let change = legacy
            .read_change(id)?
            .ok_or(MigrationError::NoSuchChange(id))?;
        let key = change.key();
        let state = ChangeState::effective(&change);
        let fresh = live_up_to_date(repos, &key, &state)?;

        if state.primary() == PrimaryStorage::Notes {
            if fresh {
                return Ok(ChangeOutcome::UpToDate);
            }
            return Err(RebuildError::StaleNotesPrimary(key).into());
        }
        if flip {
            return self.flip_under_lease(legacy, repos, id);
        }
        if change.current_patch_set.is_none() {
            tracing::info!(change = %key, "change has no patch sets; skipping");
            return Ok(ChangeOutcome::Empty);
        }
        if fresh && !force {
            return Ok(ChangeOutcome::UpToDate);
        }

        let result = retry_on_conflict(self.settings.max_retries, |_| {
            let mut batch = self.batch(legacy, repos);
            batch.add_op(id, RebuildOp::rebuild(self.rebuilder.clone()));
            batch.execute()
        });
        match result {
            Ok(done) => Ok(ChangeOutcome::Rebuilt {
                ref_updates: done.ref_updates_applied,
            }),
            Err(err) => Err(map_transaction(err)),
        }
    }

    /// Make a single change notes primary.
    pub fn migrate_to_notes_primary(&self, id: ChangeId) -> Result<ChangeOutcome, MigrationError> {
        if !self.phase.allows_primary_flip() {
            return Err(MigrationError::PhaseDisallowsFlip(self.phase));
        }
        let legacy = self.site.open_legacy()?;
        let repos = self.site.repos();
        self.migrate_change(&legacy, &repos, id, true, false)
    }

    /// Lease the row, rebuild and flip while the lease holds, and give the
    /// lease back if the flip did not happen.
    fn flip_under_lease(
        &self,
        legacy: &dyn LegacyStore,
        repos: &RepoManager,
        id: ChangeId,
    ) -> Result<ChangeOutcome, MigrationError> {
        let until = Timestamp::now().saturating_add(self.settings.read_only_timeout);
        retry_on_conflict(self.settings.max_retries, |_| {
            let mut batch = self.batch(legacy, repos);
            batch.add_op(id, LeaseOp::acquire(until));
            batch.execute()
        })
        .map_err(map_transaction)?;

        let lease = Lease {
            until,
            skew: self.settings.read_only_skew,
        };
        let flipped = retry_on_conflict(self.settings.max_retries, |_| {
            let mut batch = self.batch(legacy, repos);
            batch.add_op(id, RebuildOp::flip(self.rebuilder.clone(), lease));
            batch.execute()
        });
        match flipped {
            Ok(done) => {
                tracing::info!(change = %id, "change is now notes primary");
                Ok(ChangeOutcome::Flipped {
                    ref_updates: done.ref_updates_applied,
                })
            }
            Err(err) => {
                let mut batch = self.batch(legacy, repos);
                batch.add_op(id, LeaseOp::release(until));
                if let Err(release) = batch.execute() {
                    tracing::error!(change = %id, error = %release, "failed to release migration lease");
                }
                Err(map_transaction(err))
            }
        }
    }

    /// Return a notes-primary change to the legacy store.
    pub fn migrate_to_legacy_primary(&self, id: ChangeId) -> Result<(), MigrationError> {
        if self.phase.legacy_disabled() {
            return Err(MigrationError::LegacyDisabled(self.phase));
        }
        let legacy = self.site.open_legacy()?;
        let repos = self.site.repos();
        let change = legacy
            .read_change(id)?
            .ok_or(MigrationError::NoSuchChange(id))?;
        let key = change.key();
        let state = ChangeState::effective(&change);
        if state.primary() != PrimaryStorage::Notes {
            return Err(MigrationError::NotNotesPrimary(key));
        }
        let repo = repos.open(&key.repo)?;
        let tip = RepoRefCache::new(&repo).get(&meta_ref(id))?;
        // A later commit may carry the same trailer, so the tip must be the
        // marker recorded at flip time.
        let at_marker = match tip {
            Some(tip) if Some(tip) == state.marker() => {
                crate::notes::primary_marker(&repo, tip)? == Some(PrimaryStorage::Notes)
            }
            _ => false,
        };
        if !at_marker {
            return Err(MigrationError::NoNotesMarker(key));
        }

        retry_on_conflict(self.settings.max_retries, |_| {
            let mut batch = self.batch(&legacy, &repos);
            batch.add_op(id, LegacyRollbackOp);
            batch.execute()
        })
        .map_err(map_transaction)?;
        tracing::info!(change = %key, "change is legacy primary again");
        Ok(())
    }

    pub fn check(&self, id: ChangeId) -> Result<ChangeCheck, MigrationError> {
        let legacy = self.site.open_legacy()?;
        let repos = self.site.repos();
        let change = legacy
            .read_change(id)?
            .ok_or(MigrationError::NoSuchChange(id))?;
        let key = change.key();
        let state = ChangeState::effective(&change);
        let repo = repos.open(&key.repo)?;
        let meta_tip = RepoRefCache::new(&repo).get(&meta_ref(id))?;
        Ok(ChangeCheck {
            up_to_date: live_up_to_date(&repos, &key, &state)?,
            primary: state.primary(),
            read_only_until: state.read_only_until(),
            meta_tip,
            key,
        })
    }

    /// Projection for readers; a stale legacy-primary change is rebuilt in
    /// memory without moving refs.
    pub fn load_change_notes(&self, id: ChangeId) -> Result<LoadedNotes, MigrationError> {
        let legacy = self.site.open_legacy()?;
        Ok(self.rebuilder.load(&legacy, &self.site.repos(), id)?)
    }

    // =========================================================================
    // Change sequence
    // =========================================================================

    /// Seed the notes sequence past every legacy id; returns its value.
    pub fn seed_sequence(&self) -> Result<u32, MigrationError> {
        let legacy = self.site.open_legacy()?;
        let repos = self.site.repos();
        let legacy_max = legacy.max_change_id()?.map_or(0, ChangeId::get);
        let floor = legacy_max
            .saturating_add(1)
            .saturating_add(self.settings.sequence_gap);
        let seeded = retry_on_conflict(self.settings.max_retries, |_| {
            let mut seeded = None;
            let mut batch = self.batch(&legacy, &repos);
            batch.add_repo_op(
                RepoName::all_projects(),
                SeedSequenceOp {
                    floor,
                    seeded: &mut seeded,
                },
            );
            batch.execute()?;
            Ok(seeded)
        })?;
        let value = seeded.ok_or_else(|| {
            MigrationError::Transaction(TransactionError::Op {
                change: None,
                phase: "update_repo",
                source: OpError::msg("sequence was not read"),
            })
        })?;
        tracing::info!(next = value, legacy_max, "change sequence seeded");
        Ok(value)
    }

    /// Id for a new change: from the notes sequence once the site is in
    /// `Trial` or later, otherwise one past the largest legacy id.
    pub fn allocate_change_id(&self) -> Result<ChangeId, MigrationError> {
        let legacy = self.site.open_legacy()?;
        let legacy_max = legacy.max_change_id()?.map_or(0, ChangeId::get);
        if !self.phase.uses_notes_sequence() {
            return Ok(ChangeId::new(legacy_max.saturating_add(1))?);
        }
        let repos = self.site.repos();
        let allocated = retry_on_conflict(self.settings.max_retries, |_| {
            let mut allocated = None;
            let mut batch = self.batch(&legacy, &repos);
            batch.add_repo_op(
                RepoName::all_projects(),
                AllocateIdOp {
                    legacy_max,
                    gap: self.settings.sequence_gap,
                    allocated: &mut allocated,
                },
            );
            batch.execute()?;
            Ok(allocated)
        })?;
        let next = allocated.ok_or_else(|| {
            MigrationError::Transaction(TransactionError::Op {
                change: None,
                phase: "update_repo",
                source: OpError::msg("no id allocated"),
            })
        })?;
        Ok(ChangeId::new(next)?)
    }

    fn batch<'a>(&'a self, legacy: &'a dyn LegacyStore, repos: &'a RepoManager) -> BatchUpdate<'a> {
        BatchUpdate::new(repos, legacy, self.phase, None, Timestamp::now())
            .with_ident(self.settings.ident.clone())
    }
}

fn bulk_error(failed: usize) -> MigrationError {
    if failed == 0 {
        MigrationError::Cancelled
    } else {
        MigrationError::RebuildFailures { failed }
    }
}

fn map_transaction(err: TransactionError) -> MigrationError {
    match err {
        TransactionError::Op {
            source: OpError::LeaseLost(key),
            ..
        } => MigrationError::LeaseExpired(key),
        TransactionError::Op {
            source: OpError::Rebuild(err),
            ..
        } => MigrationError::Rebuild(err),
        other => MigrationError::Transaction(other),
    }
}

/// Compare `state` with the live refs of every repository it involves.
fn live_up_to_date(
    repos: &RepoManager,
    key: &ChangeKey,
    state: &ChangeState,
) -> Result<bool, MigrationError> {
    let mut names: BTreeSet<RepoName> = BTreeSet::new();
    names.insert(key.repo.clone());
    names.insert(RepoName::all_users());
    if let Some(refs) = state.ref_state() {
        names.extend(refs.repos().cloned());
    }
    let mut handles: Vec<(RepoName, Repository)> = Vec::with_capacity(names.len());
    for name in names {
        let repo = repos.open(&name)?;
        handles.push((name, repo));
    }
    let caches: Vec<(RepoName, RepoRefCache<'_>)> = handles
        .iter()
        .map(|(name, repo)| (name.clone(), RepoRefCache::new(repo)))
        .collect();
    let mut set = RefCaches::new();
    for (name, cache) in &caches {
        set.insert(name.clone(), cache as &dyn RefCache);
    }
    Ok(state.is_up_to_date(key, &set)?)
}
