//! Atomic multi-repository transactions over refs and legacy rows.
//!
//! A [`BatchUpdate`] collects change-scoped ops, runs them against staged views
//! and then commits in a fixed order:
//!
//! 1. one atomic ref transaction per repository, ascending by name
//! 2. one legacy transaction for every staged row
//!
//! Any failure after the first repository was written undoes the applied
//! repositories in reverse order. If undoing fails too, the caller gets a
//! [`CompensationFailureError`] naming the refs left behind.

mod context;
mod error;
mod listener;
mod op;

pub use context::{ChangeContext, RepoContext};
pub use error::{CompensationFailureError, OpError, TransactionError};
pub use listener::BatchUpdateListener;
pub use op::{BatchUpdateOp, RepoOnlyOp};

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use git2::Repository;

use crate::core::{AccountId, Change, ChangeId, ChangeKey, RepoName, Timestamp};
use crate::git::{RepoManager, apply_atomic};
use crate::legacy::{ChangeWrite, LegacyStore, LegacyWrites};
use crate::migrate::MigrationPhase;
use crate::notes::ServerIdent;
use crate::refs::{RefCache, RefCaches, RefUpdate, StagedRefView, meta_ref};
use crate::state::{PrimaryStorage, RefState};

use context::{BatchEnv, ChangeData, Views, write_notes_commit};

const REFLOG_MESSAGE: &str = "notedb: batch update";

/// Outcome of a committed batch.
#[derive(Clone, Debug, Default)]
pub struct BatchResult {
    /// Refs actually moved, across all repositories.
    pub ref_updates_applied: usize,
    /// Final rows of every change the batch touched.
    pub changes: BTreeMap<ChangeId, Change>,
}

enum Target {
    Existing(ChangeId),
    Insert(Box<Change>),
}

struct ChangeOps<'a> {
    target: Target,
    ops: Vec<Box<dyn BatchUpdateOp + 'a>>,
}

pub struct BatchUpdate<'a> {
    repos: &'a RepoManager,
    legacy: &'a dyn LegacyStore,
    ident: ServerIdent,
    phase: MigrationPhase,
    user: Option<AccountId>,
    when: Timestamp,
    changes: Vec<ChangeOps<'a>>,
    repo_ops: Vec<(RepoName, Box<dyn RepoOnlyOp + 'a>)>,
    listener: Option<Box<dyn BatchUpdateListener + 'a>>,
    deadline: Option<Instant>,
}

impl<'a> BatchUpdate<'a> {
    /// `user` is the acting account; `None` acts as the server. Every row and
    /// commit written by the batch carries `when`.
    pub fn new(
        repos: &'a RepoManager,
        legacy: &'a dyn LegacyStore,
        phase: MigrationPhase,
        user: Option<AccountId>,
        when: Timestamp,
    ) -> Self {
        Self {
            repos,
            legacy,
            ident: ServerIdent::default(),
            phase,
            user,
            when,
            changes: Vec::new(),
            repo_ops: Vec::new(),
            listener: None,
            deadline: None,
        }
    }

    pub fn with_ident(mut self, ident: ServerIdent) -> Self {
        self.ident = ident;
        self
    }

    pub fn add_op(&mut self, change: ChangeId, op: impl BatchUpdateOp + 'a) -> &mut Self {
        match self.changes.iter_mut().find(
            |entry| matches!(&entry.target, Target::Existing(id) if *id == change),
        ) {
            Some(entry) => entry.ops.push(Box::new(op)),
            None => self.changes.push(ChangeOps {
                target: Target::Existing(change),
                ops: vec![Box::new(op)],
            }),
        }
        self
    }

    /// Create `change` (with no patch sets yet); `op` runs against it.
    pub fn insert_change(&mut self, change: Change, op: impl BatchUpdateOp + 'a) -> &mut Self {
        self.changes.push(ChangeOps {
            target: Target::Insert(Box::new(change)),
            ops: vec![Box::new(op)],
        });
        self
    }

    pub fn add_repo_op(&mut self, repo: RepoName, op: impl RepoOnlyOp + 'a) -> &mut Self {
        self.repo_ops.push((repo, Box::new(op)));
        self
    }

    pub fn set_listener(&mut self, listener: impl BatchUpdateListener + 'a) -> &mut Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Run every op and commit, or leave refs and rows as they were.
    pub fn execute(mut self) -> Result<BatchResult, TransactionError> {
        let span = tracing::debug_span!(
            "batch_update",
            phase = %self.phase,
            changes = self.changes.len(),
            repo_ops = self.repo_ops.len()
        );
        let _guard = span.enter();

        let env = BatchEnv {
            legacy: self.legacy,
            ident: &self.ident,
            phase: self.phase,
            user: self.user,
            when: self.when,
        };

        let mut data = Vec::with_capacity(self.changes.len());
        for entry in &self.changes {
            let change = match &entry.target {
                Target::Existing(id) => {
                    let change = self
                        .legacy
                        .read_change(*id)?
                        .ok_or(TransactionError::ChangeNotFound(*id))?;
                    ChangeData::existing(change)
                }
                Target::Insert(change) => ChangeData::inserted((**change).clone(), &env),
            };
            let bypass = entry.ops.iter().all(|op| op.bypass_read_only());
            if !bypass
                && let Some(until) = change.state.read_only_until()
                && change.state.is_read_only(self.when, Duration::ZERO)
            {
                return Err(TransactionError::ReadOnly {
                    change: change.key,
                    until,
                });
            }
            data.push(change);
        }

        let mut names: BTreeSet<RepoName> = self.repo_ops.iter().map(|(r, _)| r.clone()).collect();
        if !data.is_empty() {
            names.insert(RepoName::all_users());
        }
        names.extend(data.iter().map(|d| d.key.repo.clone()));
        let mut handles: BTreeMap<RepoName, Repository> = BTreeMap::new();
        for name in names {
            let repo = self.repos.open(&name)?;
            handles.insert(name, repo);
        }
        let views: Views<'_> = handles
            .iter()
            .map(|(name, repo)| (name.clone(), StagedRefView::new(name.clone(), repo)))
            .collect();

        check_deadline(self.deadline, "open")?;

        // update_repo
        for (repo, op) in &mut self.repo_ops {
            let mut ctx = RepoContext {
                env: &env,
                views: &views,
                change: None,
            };
            op.update_repo(&mut ctx).map_err(|source| TransactionError::Op {
                change: None,
                phase: "update_repo",
                source: wrap_repo(repo, source),
            })?;
        }
        for (entry, change) in self.changes.iter_mut().zip(&data) {
            for op in &mut entry.ops {
                let mut ctx = RepoContext {
                    env: &env,
                    views: &views,
                    change: Some(&change.change),
                };
                op.update_repo(&mut ctx).map_err(|source| TransactionError::Op {
                    change: Some(change.key.clone()),
                    phase: "update_repo",
                    source,
                })?;
            }
        }
        if let Some(listener) = self.listener.as_mut() {
            listener
                .after_update_repos()
                .map_err(|source| TransactionError::Op {
                    change: None,
                    phase: "after_update_repos",
                    source,
                })?;
        }
        check_deadline(self.deadline, "update_repo")?;

        // update_change
        for (entry, change) in self.changes.iter_mut().zip(data.iter_mut()) {
            for op in &mut entry.ops {
                let key = change.key.clone();
                let mut ctx = ChangeContext {
                    env: &env,
                    views: &views,
                    data: &mut *change,
                };
                let dirty = op
                    .update_change(&mut ctx)
                    .map_err(|source| TransactionError::Op {
                        change: Some(key),
                        phase: "update_change",
                        source,
                    })?;
                change.dirty |= dirty;
            }
        }

        let mut writes = LegacyWrites::default();
        for change in &mut data {
            finalize_change(&env, &views, change, &mut writes)?;
        }
        if let Some(listener) = self.listener.as_mut() {
            listener
                .after_update_changes()
                .map_err(|source| TransactionError::Op {
                    change: None,
                    phase: "after_update_changes",
                    source,
                })?;
        }
        check_deadline(self.deadline, "update_change")?;

        // Commit: refs per repository, then legacy rows.
        let committer = self.ident.committer(self.when)?;
        let mut applied: Vec<(RepoName, Vec<RefUpdate>)> = Vec::new();
        let mut ref_updates_applied = 0;
        for (name, view) in &views {
            let updates = view.updates();
            if updates.is_empty() {
                continue;
            }
            let repo = view.repo();
            let step = apply_atomic(repo, name, &updates, &committer, REFLOG_MESSAGE)
                .map_err(TransactionError::from);
            let written = match step {
                Ok(written) => written,
                Err(err) => return Err(compensate(&handles, &committer, applied, err)),
            };
            ref_updates_applied += written;
            applied.push((name.clone(), updates.clone()));

            let mut step = Ok(());
            if let Some(listener) = self.listener.as_mut() {
                step = listener
                    .after_ref_updates(name, &updates)
                    .map_err(|source| TransactionError::Op {
                        change: None,
                        phase: "after_ref_updates",
                        source,
                    });
            }
            if let Err(err) = step.and_then(|()| check_deadline(self.deadline, "ref_updates")) {
                return Err(compensate(&handles, &committer, applied, err));
            }
        }

        if let Err(err) = self.legacy.commit(&writes) {
            return Err(compensate(&handles, &committer, applied, err.into()));
        }

        let changes = data
            .into_iter()
            .map(|d| (d.change.id, d.change))
            .collect();
        tracing::debug!(refs = ref_updates_applied, "batch committed");
        Ok(BatchResult {
            ref_updates_applied,
            changes,
        })
    }
}

fn wrap_repo(repo: &RepoName, source: OpError) -> OpError {
    match source {
        OpError::Failed(message) => OpError::Failed(format!("{repo}: {message}")),
        other => other,
    }
}

fn check_deadline(deadline: Option<Instant>, phase: &'static str) -> Result<(), TransactionError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(TransactionError::Timeout { phase }),
        _ => Ok(()),
    }
}

/// Append recorded events to the notes copy where the phase and primary
/// storage call for it, then stage the legacy rows and the new token.
fn finalize_change(
    env: &BatchEnv<'_>,
    views: &Views<'_>,
    change: &mut ChangeData,
    writes: &mut LegacyWrites,
) -> Result<(), TransactionError> {
    if !change.dirty && !change.state_overridden {
        return Ok(());
    }
    let key = change.key.clone();
    let events = std::mem::take(&mut change.events);
    let meta = meta_ref(key.id);

    if change.is_new {
        if env.phase.writes_notes() && !events.is_empty() {
            let tip = write_notes_commit(env, views, &key, events).map_err(op_error(&key))?;
            let refs = RefState::new().with(&key.repo, meta, Some(tip));
            change.state = if env.phase.new_changes_notes_primary() {
                change.state.with_primary(PrimaryStorage::Notes, refs)
            } else {
                change.state.with_ref_state(refs)
            };
        }
        let mut row = change.change.clone();
        row.note_db_state = Some(change.state.to_token()?);
        row.last_updated_on = row.last_updated_on.max(env.when);
        row.row_version = 0;
        writes.changes.push(ChangeWrite::Insert(row.clone()));
        if change.state.primary() == PrimaryStorage::Legacy {
            writes.extend(std::mem::take(&mut change.writes));
        }
        change.change = row;
        return Ok(());
    }

    let caches = views_as_caches(views);
    match change.state.primary() {
        PrimaryStorage::Notes => {
            if !events.is_empty() {
                if !env.phase.legacy_disabled() && !change.state.is_up_to_date(&key, &caches)? {
                    return Err(TransactionError::StaleNotesPrimary(key));
                }
                let tip = write_notes_commit(env, views, &key, events).map_err(op_error(&key))?;
                let refs = change
                    .state
                    .ref_state()
                    .cloned()
                    .unwrap_or_default()
                    .with(&key.repo, meta, Some(tip));
                change.state = change.state.with_ref_state(refs);
            }
            // Rows are no longer authoritative: only the token moves.
            let mut row = change.original.clone();
            row.note_db_state = Some(change.state.to_token()?);
            push_update(writes, &mut change.change, row, change.original.row_version);
        }
        PrimaryStorage::Legacy => {
            // Neither store would keep the write.
            if change.dirty && env.phase.legacy_disabled() {
                return Err(TransactionError::LegacyDisabled(key));
            }
            if !events.is_empty() {
                let fresh = env.phase.writes_notes() && change.state.is_up_to_date(&key, &caches)?;
                if fresh {
                    let tip =
                        write_notes_commit(env, views, &key, events).map_err(op_error(&key))?;
                    let refs = change
                        .state
                        .ref_state()
                        .cloned()
                        .unwrap_or_default()
                        .with(&key.repo, meta, Some(tip));
                    change.state = change.state.with_ref_state(refs);
                } else {
                    change.state = change.state.without_ref_state();
                }
            }
            let mut row = change.change.clone();
            row.note_db_state = Some(change.state.to_token()?);
            if change.dirty {
                row.last_updated_on = row.last_updated_on.max(env.when);
            }
            writes.extend(std::mem::take(&mut change.writes));
            push_update(writes, &mut change.change, row, change.original.row_version);
        }
    }
    Ok(())
}

fn push_update(writes: &mut LegacyWrites, current: &mut Change, row: Change, expected_version: u64) {
    let mut committed = row.clone();
    committed.row_version = expected_version + 1;
    *current = committed;
    writes.changes.push(ChangeWrite::Update {
        change: row,
        expected_version,
    });
}

fn op_error(key: &ChangeKey) -> impl Fn(OpError) -> TransactionError + '_ {
    move |source| TransactionError::Op {
        change: Some(key.clone()),
        phase: "notes",
        source,
    }
}

fn views_as_caches<'v>(views: &'v Views<'_>) -> RefCaches<'v> {
    let mut caches = RefCaches::new();
    for (name, view) in views {
        caches.insert(name.clone(), view as &dyn RefCache);
    }
    caches
}

/// Undo `applied` in reverse order and return the error to report.
fn compensate(
    handles: &BTreeMap<RepoName, Repository>,
    committer: &git2::Signature<'_>,
    applied: Vec<(RepoName, Vec<RefUpdate>)>,
    cause: TransactionError,
) -> TransactionError {
    if applied.is_empty() {
        return cause;
    }
    tracing::warn!(error = %cause, repos = applied.len(), "rolling back applied ref updates");
    let mut unrestored = Vec::new();
    for (name, updates) in applied.into_iter().rev() {
        let inverse: Vec<RefUpdate> = updates
            .iter()
            .filter(|u| !u.is_noop())
            .map(RefUpdate::inverse)
            .collect();
        let Some(repo) = handles.get(&name) else {
            unrestored.extend(updates);
            continue;
        };
        if let Err(err) = apply_atomic(repo, &name, &inverse, committer, "notedb: compensate") {
            tracing::error!(repo = %name, error = %err, "compensation failed");
            unrestored.extend(updates.into_iter().filter(|u| !u.is_noop()));
        }
    }
    if unrestored.is_empty() {
        cause
    } else {
        TransactionError::Compensation(CompensationFailureError {
            unrestored,
            cause: Box::new(cause),
        })
    }
}

/// Run `attempt` until it succeeds, fails without a conflict, or `max_retries`
/// retries are used up. `attempt` gets the zero-based try number.
pub fn retry_on_conflict<T>(
    max_retries: usize,
    mut attempt: impl FnMut(usize) -> Result<T, TransactionError>,
) -> Result<T, TransactionError> {
    let mut tries = 0;
    loop {
        match attempt(tries) {
            Err(err) if err.is_conflict() && tries < max_retries => {
                tracing::debug!(error = %err, attempt = tries, "retrying after conflict");
                tries += 1;
            }
            other => return other,
        }
    }
}
