//! Throwaway review sites seeded with legacy rows.

#![allow(dead_code)]

pub mod ops;

use std::path::Path;

use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

use notedb_rs::core::{
    AccountId, ApprovalRow, Change, ChangeId, ChangeStatus, CommentRow, CommentStatus,
    MessageRow, PatchSetId, PatchSetRow, RepoName, Timestamp,
};
use notedb_rs::git::RepoManager;
use notedb_rs::legacy::{ChangeWrite, LegacyStore, LegacyWrites, SqliteLegacyStore};
use notedb_rs::migrate::{MigrationPhase, Migrator, MigratorSettings, PhaseStore};
use notedb_rs::refs::{meta_ref, read_ref};
use notedb_rs::site::Site;
use notedb_rs::state::ChangeState;

pub const BASE_MS: i64 = 1_600_000_000_000;

pub fn ts(secs: i64) -> Timestamp {
    Timestamp::from_millis(BASE_MS + secs * 1_000)
}

pub fn cid(id: u32) -> ChangeId {
    ChangeId::new(id).expect("change id")
}

pub fn ps(id: u32) -> PatchSetId {
    PatchSetId::new(id).expect("patch set id")
}

pub fn account(id: u32) -> AccountId {
    AccountId::new(id).expect("account id")
}

pub fn repo(name: &str) -> RepoName {
    RepoName::new(name).expect("repo name")
}

pub struct TestSite {
    _dir: TempDir,
    pub site: Site,
}

impl TestSite {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let site = Site::new(dir.path().join("site"));
        site.init().expect("init site");
        Self { _dir: dir, site }
    }

    pub fn root(&self) -> &Path {
        self.site.root()
    }

    pub fn legacy(&self) -> SqliteLegacyStore {
        self.site.open_legacy().expect("open legacy store")
    }

    pub fn repos(&self) -> RepoManager {
        self.site.repos()
    }

    pub fn project(&self, name: &str) -> RepoName {
        let name = repo(name);
        self.repos().open_or_create(&name).expect("create project");
        name
    }

    pub fn open(&self, name: &RepoName) -> Repository {
        self.repos().open(name).expect("open repo")
    }

    pub fn change(&self, id: u32) -> Change {
        self.legacy()
            .read_change(cid(id))
            .expect("read change")
            .expect("change exists")
    }

    pub fn state(&self, id: u32) -> ChangeState {
        ChangeState::effective(&self.change(id))
    }

    pub fn meta_tip(&self, id: u32) -> Option<Oid> {
        let change = self.change(id);
        read_ref(&self.open(&change.repo), &meta_ref(change.id)).expect("read meta ref")
    }

    pub fn commit_rows(&self, writes: LegacyWrites) {
        self.legacy().commit(&writes).expect("commit legacy rows");
    }

    /// Persist `phase` in the site file, whatever it held before.
    pub fn set_phase(&self, phase: MigrationPhase) {
        let store = PhaseStore::for_site(&self.site);
        let current = store.load().expect("load phase");
        if current != phase {
            store.save(current, phase).expect("save phase");
        }
    }

    pub fn phase(&self) -> MigrationPhase {
        PhaseStore::for_site(&self.site).load().expect("load phase")
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::open(self.site.clone()).expect("open migrator")
    }

    /// Migrator at `phase` (persisted first) with custom settings.
    pub fn migrator_with(&self, phase: MigrationPhase, settings: MigratorSettings) -> Migrator {
        self.set_phase(phase);
        Migrator::new(self.site.clone(), phase, settings)
    }
}

/// Legacy history of one change, written straight into the database.
pub struct ChangeSeed {
    pub repo: RepoName,
    pub id: u32,
    pub owner: u32,
    pub patch_sets: u32,
    pub status: ChangeStatus,
    pub votes: Vec<(u32, u32, &'static str, Option<i16>)>,
    pub messages: Vec<(Option<u32>, &'static str)>,
    pub comments: Vec<(u32, &'static str, CommentStatus)>,
}

impl ChangeSeed {
    pub fn new(repo: &RepoName, id: u32) -> Self {
        Self {
            repo: repo.clone(),
            id,
            owner: 100,
            patch_sets: 1,
            status: ChangeStatus::New,
            votes: Vec::new(),
            messages: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn patch_sets(mut self, count: u32) -> Self {
        self.patch_sets = count;
        self
    }

    /// `(account, patch set, label, value)`.
    pub fn vote(mut self, account: u32, patch_set: u32, label: &'static str, value: Option<i16>) -> Self {
        self.votes.push((account, patch_set, label, value));
        self
    }

    pub fn message(mut self, author: Option<u32>, text: &'static str) -> Self {
        self.messages.push((author, text));
        self
    }

    pub fn comment(mut self, author: u32, text: &'static str, status: CommentStatus) -> Self {
        self.comments.push((author, text, status));
        self
    }

    pub fn status(mut self, status: ChangeStatus) -> Self {
        self.status = status;
        self
    }

    /// Rows as the legacy store would hold them; one second between rows.
    pub fn writes(&self) -> LegacyWrites {
        let id = cid(self.id);
        let base = i64::from(self.id) * 1_000;
        let mut clock = 0;
        let mut tick = || {
            clock += 1;
            ts(base + clock)
        };

        let created = ts(base);
        let mut writes = LegacyWrites::default();
        for n in 1..=self.patch_sets {
            writes.patch_sets.push(PatchSetRow {
                change: id,
                id: ps(n),
                revision: format!("{:040x}", u64::from(self.id) * 1_000 + u64::from(n)),
                uploader: account(self.owner),
                created_on: tick(),
            });
        }
        for (who, patch_set, label, value) in &self.votes {
            writes.approvals.push(ApprovalRow {
                row_id: 0,
                change: id,
                patch_set: ps(*patch_set),
                account: account(*who),
                label: (*label).to_string(),
                value: *value,
                granted: tick(),
            });
        }
        for (author, text) in &self.messages {
            writes.messages.push(MessageRow {
                row_id: 0,
                change: id,
                uuid: String::new(),
                author: author.map(account),
                written_on: tick(),
                patch_set: (self.patch_sets > 0).then(|| ps(self.patch_sets)),
                message: (*text).to_string(),
            });
        }
        for (author, text, status) in &self.comments {
            writes.comments.push(CommentRow {
                row_id: 0,
                change: id,
                patch_set: ps(self.patch_sets.max(1)),
                uuid: String::new(),
                author: account(*author),
                written_on: tick(),
                file: "src/lib.rs".to_string(),
                line: Some(7),
                message: (*text).to_string(),
                status: *status,
            });
        }
        let last = tick();
        writes.changes.push(ChangeWrite::Insert(Change {
            id,
            repo: self.repo.clone(),
            branch: "refs/heads/main".to_string(),
            subject: format!("Change {}", self.id),
            owner: account(self.owner),
            status: self.status,
            current_patch_set: (self.patch_sets > 0).then(|| ps(self.patch_sets)),
            created_on: created,
            last_updated_on: last,
            note_db_state: None,
            row_version: 0,
        }));
        writes
    }
}

impl TestSite {
    pub fn seed(&self, seed: ChangeSeed) -> ChangeId {
        let id = cid(seed.id);
        self.commit_rows(seed.writes());
        id
    }

    /// `count` changes with one patch set and a vote each, ids from 1.
    pub fn seed_many(&self, repo: &RepoName, count: u32) -> Vec<ChangeId> {
        (1..=count)
            .map(|id| self.seed(ChangeSeed::new(repo, id).vote(200, 1, "Code-Review", Some(1))))
            .collect()
    }
}

/// A commit reachable from no ref, for staging ref updates.
pub fn loose_commit(repo: &Repository, message: &str) -> Oid {
    let tree_id = repo
        .treebuilder(None)
        .and_then(|builder| builder.write())
        .expect("write empty tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = Signature::new("Test", "test@example.com", &git2::Time::new(1_600_000_000, 0))
        .expect("signature");
    repo.commit(None, &sig, &sig, message, &tree, &[])
        .expect("write commit")
}

/// Point `name` at `target` (or delete it) behind the library's back.
pub fn force_ref(repo: &Repository, name: &str, target: Option<Oid>) {
    match target {
        Some(oid) => {
            repo.reference(name, oid, true, "test").expect("set ref");
        }
        None => {
            if let Ok(mut reference) = repo.find_reference(name) {
                reference.delete().expect("delete ref");
            }
        }
    }
}
