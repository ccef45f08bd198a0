//! Views lent to op hooks.
//!
//! The executor owns one [`StagedRefView`] per repository and one
//! [`ChangeData`] per change for the whole transaction; hooks borrow them
//! through these contexts.

use std::collections::BTreeMap;

use git2::Oid;

use crate::core::{
    AccountId, ApprovalRow, Change, ChangeKey, ChangeStatus, HashtagRow, MessageRow, PatchSetId,
    PatchSetRow, RepoName, Timestamp,
};
use crate::legacy::{LegacyStore, LegacyWrites};
use crate::migrate::MigrationPhase;
use crate::notes::{ChangeNotesState, Event, EventKind, ServerIdent, read_change_state};
use crate::rebuild::{Bucket, write_meta_buckets};
use crate::refs::{RefCache, RefCaches, StagedRefView, meta_ref};
use crate::state::ChangeState;

use super::error::OpError;

pub(crate) type Views<'r> = BTreeMap<RepoName, StagedRefView<'r>>;

/// Settings shared by every hook of one batch.
pub(crate) struct BatchEnv<'a> {
    pub legacy: &'a dyn LegacyStore,
    pub ident: &'a ServerIdent,
    pub phase: MigrationPhase,
    pub user: Option<AccountId>,
    pub when: Timestamp,
}

/// Executor-owned working copy of one change.
pub(crate) struct ChangeData {
    pub key: ChangeKey,
    pub is_new: bool,
    /// Row as loaded; its `row_version` guards the legacy write.
    pub original: Change,
    pub change: Change,
    pub state: ChangeState,
    pub state_overridden: bool,
    pub writes: LegacyWrites,
    pub events: Vec<Event>,
    pub dirty: bool,
}

impl ChangeData {
    pub fn existing(change: Change) -> Self {
        let state = ChangeState::effective(&change);
        Self {
            key: change.key(),
            is_new: false,
            original: change.clone(),
            change,
            state,
            state_overridden: false,
            writes: LegacyWrites::default(),
            events: Vec::new(),
            dirty: false,
        }
    }

    pub fn inserted(change: Change, env: &BatchEnv<'_>) -> Self {
        let create = Event::new(
            env.user.or(Some(change.owner)),
            env.when,
            EventKind::CreateChange {
                branch: change.branch.clone(),
                subject: change.subject.clone(),
                owner: change.owner,
            },
        );
        Self {
            key: change.key(),
            is_new: true,
            original: change.clone(),
            change,
            state: ChangeState::legacy(),
            state_overridden: false,
            writes: LegacyWrites::default(),
            events: vec![create],
            dirty: true,
        }
    }
}

fn view<'v, 'r>(views: &'v Views<'r>, repo: &RepoName) -> Result<&'v StagedRefView<'r>, OpError> {
    views
        .get(repo)
        .ok_or_else(|| OpError::UnknownRepo(repo.clone()))
}

pub struct RepoContext<'a> {
    pub(crate) env: &'a BatchEnv<'a>,
    pub(crate) views: &'a Views<'a>,
    pub(crate) change: Option<&'a Change>,
}

impl<'a> RepoContext<'a> {
    /// Staged view of `repo`; only repositories opened for the batch exist.
    pub fn repo(&self, repo: &RepoName) -> Result<&'a StagedRefView<'a>, OpError> {
        view(self.views, repo)
    }

    /// The change this op is bound to; `None` for repo-only ops.
    pub fn change(&self) -> Option<&'a Change> {
        self.change
    }

    /// Views of every repository in the batch, for consistency checks.
    pub fn ref_caches(&self) -> RefCaches<'a> {
        let mut caches = RefCaches::new();
        for (name, view) in self.views {
            caches.insert(name.clone(), view as &dyn RefCache);
        }
        caches
    }

    pub fn legacy(&self) -> &'a dyn LegacyStore {
        self.env.legacy
    }

    pub fn ident(&self) -> &'a ServerIdent {
        self.env.ident
    }

    pub fn phase(&self) -> MigrationPhase {
        self.env.phase
    }

    pub fn user(&self) -> Option<AccountId> {
        self.env.user
    }

    pub fn now(&self) -> Timestamp {
        self.env.when
    }
}

pub struct ChangeContext<'a> {
    pub(crate) env: &'a BatchEnv<'a>,
    pub(crate) views: &'a Views<'a>,
    pub(crate) data: &'a mut ChangeData,
}

impl<'a> ChangeContext<'a> {
    pub fn key(&self) -> &ChangeKey {
        &self.data.key
    }

    pub fn change(&self) -> &Change {
        &self.data.change
    }

    pub fn change_mut(&mut self) -> &mut Change {
        &mut self.data.change
    }

    pub fn is_new(&self) -> bool {
        self.data.is_new
    }

    pub fn state(&self) -> &ChangeState {
        &self.data.state
    }

    /// Replace the consistency token written with the change.
    ///
    /// The executor still appends recorded events, but otherwise keeps the
    /// ref state as given.
    pub fn set_state(&mut self, state: ChangeState) {
        self.data.state = state;
        self.data.state_overridden = true;
    }

    pub fn repo(&self, repo: &RepoName) -> Result<&'a StagedRefView<'a>, OpError> {
        view(self.views, repo)
    }

    pub fn ref_caches(&self) -> RefCaches<'a> {
        let mut caches = RefCaches::new();
        for (name, view) in self.views {
            caches.insert(name.clone(), view as &dyn RefCache);
        }
        caches
    }

    pub fn phase(&self) -> MigrationPhase {
        self.env.phase
    }

    pub fn user(&self) -> Option<AccountId> {
        self.env.user
    }

    pub fn now(&self) -> Timestamp {
        self.env.when
    }

    /// Record an event for the notes copy without a legacy row.
    pub fn record(&mut self, patch_set: Option<PatchSetId>, kind: EventKind) {
        self.data.events.push(
            Event::new(self.env.user, self.env.when, kind).on_patch_set(patch_set),
        );
    }

    pub fn legacy_writes(&mut self) -> &mut LegacyWrites {
        &mut self.data.writes
    }

    fn acting_account(&self) -> Result<AccountId, OpError> {
        self.env.user.ok_or(OpError::NoUser)
    }

    /// Upload a new patch set and make it current.
    pub fn add_patch_set(&mut self, revision: impl Into<String>) -> Result<PatchSetId, OpError> {
        let uploader = self.acting_account()?;
        let next = self.data.change.current_patch_set.map_or(1, |ps| ps.get() + 1);
        let id = PatchSetId::new(next).map_err(|err| OpError::msg(err.to_string()))?;
        let revision = revision.into();
        self.data.writes.patch_sets.push(PatchSetRow {
            change: self.data.change.id,
            id,
            revision: revision.clone(),
            uploader,
            created_on: self.env.when,
        });
        self.data.change.current_patch_set = Some(id);
        self.record(Some(id), EventKind::PatchSetCreated { revision });
        Ok(id)
    }

    /// Set, delete (`Some(0)`) or clear to reviewer-only (`None`) a vote.
    pub fn post_vote(
        &mut self,
        patch_set: PatchSetId,
        label: &str,
        value: Option<i16>,
    ) -> Result<(), OpError> {
        let account = self.acting_account()?;
        self.data.writes.approvals.push(ApprovalRow {
            row_id: 0,
            change: self.data.change.id,
            patch_set,
            account,
            label: label.to_string(),
            value,
            granted: self.env.when,
        });
        let label = label.to_string();
        let kind = match value {
            None => EventKind::NoVote { label },
            Some(0) => EventKind::VoteRemoved { label },
            Some(value) => EventKind::VoteCast { label, value },
        };
        self.record(Some(patch_set), kind);
        Ok(())
    }

    pub fn add_message(&mut self, patch_set: Option<PatchSetId>, text: impl Into<String>) {
        let text = text.into();
        let uuid = uuid::Uuid::new_v4().to_string();
        self.data.writes.messages.push(MessageRow {
            row_id: 0,
            change: self.data.change.id,
            uuid: uuid.clone(),
            author: self.env.user,
            written_on: self.env.when,
            patch_set,
            message: text.clone(),
        });
        self.record(patch_set, EventKind::Message { uuid, text });
    }

    pub fn add_hashtag(&mut self, hashtag: impl Into<String>) -> Result<(), OpError> {
        let account = self.acting_account()?;
        let hashtag = hashtag.into();
        self.data.writes.hashtags.push(HashtagRow {
            row_id: 0,
            change: self.data.change.id,
            account,
            added_on: self.env.when,
            hashtag: hashtag.clone(),
        });
        self.record(None, EventKind::HashtagAdded { hashtag });
        Ok(())
    }

    pub fn set_status(&mut self, status: ChangeStatus) {
        self.data.change.status = status;
        let patch_set = self.data.change.current_patch_set;
        self.record(patch_set, EventKind::StatusChanged { status });
    }

    /// Write one commit carrying `events` on top of the staged meta tip and
    /// stage the meta ref to it. Returns the new tip.
    pub fn write_notes_commit(&self, events: Vec<Event>) -> Result<Oid, OpError> {
        write_notes_commit(self.env, self.views, &self.data.key, events)
    }
}

/// Append `events` as one commit to the change's meta ref (staged).
pub(crate) fn write_notes_commit(
    env: &BatchEnv<'_>,
    views: &Views<'_>,
    key: &ChangeKey,
    events: Vec<Event>,
) -> Result<Oid, OpError> {
    let view = view(views, &key.repo)?;
    let meta = meta_ref(key.id);
    let parent = view.get(&meta)?;
    let mut state = match parent {
        Some(tip) => read_change_state(view.repo(), tip)?,
        None => ChangeNotesState::empty(key.repo.clone(), key.id),
    };
    let who = events.first().and_then(|e| e.who);
    let bucket = Bucket { who, events };
    let commits = write_meta_buckets(
        view.repo(),
        env.ident,
        parent,
        &mut state,
        std::slice::from_ref(&bucket),
    )?;
    let tip = commits
        .last()
        .copied()
        .ok_or_else(|| OpError::msg("no commit written"))?;
    view.stage(&meta, Some(tip))?;
    Ok(tip)
}
