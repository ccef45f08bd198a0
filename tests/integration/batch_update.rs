use std::time::Duration;

use notedb_rs::core::{Change, ChangeStatus, RepoName, Timestamp};
use notedb_rs::legacy::{ChangeWrite, LegacyStore, LegacyWrites};
use notedb_rs::migrate::{CancelToken, MigrateOptions, MigrationPhase};
use notedb_rs::notes::read_change_state;
use notedb_rs::refs::{meta_ref, read_ref};
use notedb_rs::state::{ChangeState, PrimaryStorage};
use notedb_rs::update::{BatchUpdate, TransactionError};
use notedb_rs::{Effect, Error};

use crate::fixtures::ops::{
    BumpRowListener, FailAfterRepo, FailingOp, RaceListener, SabotageListener, StageRefsOp,
    UploadOp, VoteOp,
};
use crate::fixtures::{ChangeSeed, TestSite, account, cid, force_ref, loose_commit, ps, ts};

const MARKER: &str = "refs/users/test-marker";
const FEATURE: &str = "refs/heads/feature";

fn vote(value: i16) -> VoteOp {
    VoteOp {
        patch_set: ps(1),
        label: "Code-Review",
        value: Some(value),
    }
}

fn rebuild_all(t: &TestSite) {
    let report = t
        .migrator()
        .rebuild(&MigrateOptions::default(), &CancelToken::new())
        .unwrap();
    assert!(report.is_clean(), "rebuild failed: {report:?}");
}

#[test]
fn dual_write_appends_to_current_notes() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    rebuild_all(&t);
    let before = t.meta_tip(1).expect("rebuilt meta ref");

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::ReadWrite,
        Some(account(300)),
        ts(50_000),
    );
    batch.add_op(cid(1), vote(2));
    let result = batch.execute().unwrap();
    assert_eq!(result.ref_updates_applied, 1);

    let after = t.meta_tip(1).unwrap();
    assert_ne!(after, before);
    let repo = t.open(&p);
    let commit = repo.find_commit(after).unwrap();
    assert_eq!(commit.parent_id(0).unwrap(), before);

    let notes = read_change_state(&repo, after).unwrap();
    assert_eq!(notes.approval(ps(1), "Code-Review", account(300)), Some(2));

    let state = t.state(1);
    assert_eq!(state.primary(), PrimaryStorage::Legacy);
    assert_eq!(state.ref_state().unwrap().get(&p, &meta_ref(cid(1))), Some(after));
    assert!(t.migrator().check(cid(1)).unwrap().up_to_date);

    let bundle = t.legacy().read_bundle(cid(1)).unwrap();
    assert!(bundle
        .approvals
        .iter()
        .any(|a| a.account == account(300) && a.value == Some(2)));
}

#[test]
fn stale_notes_are_left_alone_and_marked() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::Write,
        Some(account(300)),
        ts(50_000),
    );
    batch.add_op(cid(1), vote(1));
    let result = batch.execute().unwrap();

    assert_eq!(result.ref_updates_applied, 0);
    assert_eq!(t.meta_tip(1), None);
    assert!(t.state(1).ref_state().is_none());
    assert!(!t.migrator().check(cid(1)).unwrap().up_to_date);
    assert_eq!(t.legacy().read_bundle(cid(1)).unwrap().approvals.len(), 1);
}

#[test]
fn legacy_only_phase_writes_no_notes() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    rebuild_all(&t);
    let before = t.meta_tip(1);

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(cid(1), vote(1));
    batch.execute().unwrap();

    assert_eq!(t.meta_tip(1), before);
    assert!(t.state(1).ref_state().is_none());
}

#[test]
fn racing_ref_writer_fails_batch_and_rolls_back() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let users = RepoName::all_users();
    let repos = t.repos();

    let ours = loose_commit(&t.open(&p), "ours");
    let theirs = loose_commit(&t.open(&p), "theirs");
    let marker = loose_commit(&t.open(&users), "marker");
    let version = t.change(1).row_version;

    let legacy = t.legacy();
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(
        cid(1),
        StageRefsOp {
            refs: vec![
                (p.clone(), FEATURE.to_string(), Some(ours)),
                (users.clone(), MARKER.to_string(), Some(marker)),
            ],
            vote: vote(1),
        },
    );
    batch.set_listener(RaceListener {
        repo_path: repos.path_of(&p),
        name: FEATURE.to_string(),
        target: theirs,
    });
    let err = batch.execute().unwrap_err();

    assert!(err.is_conflict(), "expected conflict, got {err:?}");
    assert!(matches!(err, TransactionError::RefConflict(_)));
    assert_eq!(read_ref(&t.open(&p), FEATURE).unwrap(), Some(theirs));
    assert_eq!(read_ref(&t.open(&users), MARKER).unwrap(), None);
    assert_eq!(t.change(1).row_version, version);
    assert!(t.legacy().read_bundle(cid(1)).unwrap().approvals.is_empty());
}

#[test]
fn lost_row_race_undoes_every_repository() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let users = RepoName::all_users();
    let repos = t.repos();
    let feature = loose_commit(&t.open(&p), "feature");
    let marker = loose_commit(&t.open(&users), "marker");

    let legacy = t.legacy();
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(
        cid(1),
        StageRefsOp {
            refs: vec![
                (p.clone(), FEATURE.to_string(), Some(feature)),
                (users.clone(), MARKER.to_string(), Some(marker)),
            ],
            vote: vote(1),
        },
    );
    batch.set_listener(BumpRowListener {
        db: t.site.db_path(),
        change: cid(1),
    });
    let err = batch.execute().unwrap_err();

    assert!(err.is_conflict(), "expected row version conflict, got {err:?}");
    assert_eq!(read_ref(&t.open(&p), FEATURE).unwrap(), None);
    assert_eq!(read_ref(&t.open(&users), MARKER).unwrap(), None);
}

#[test]
fn listener_failure_after_refs_is_compensated() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let users = RepoName::all_users();
    let repos = t.repos();
    let feature = loose_commit(&t.open(&p), "feature");
    let marker = loose_commit(&t.open(&users), "marker");

    let legacy = t.legacy();
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(
        cid(1),
        StageRefsOp {
            refs: vec![
                (p.clone(), FEATURE.to_string(), Some(feature)),
                (users.clone(), MARKER.to_string(), Some(marker)),
            ],
            vote: vote(1),
        },
    );
    batch.set_listener(FailAfterRepo { repo: p.clone() });
    let err = batch.execute().unwrap_err();

    assert!(matches!(
        err,
        TransactionError::Op {
            phase: "after_ref_updates",
            ..
        }
    ));
    assert_eq!(read_ref(&t.open(&p), FEATURE).unwrap(), None);
    assert_eq!(read_ref(&t.open(&users), MARKER).unwrap(), None);
    assert!(t.legacy().read_bundle(cid(1)).unwrap().approvals.is_empty());
}

#[test]
fn failed_compensation_names_leftover_refs() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let users = RepoName::all_users();
    let repos = t.repos();
    let feature = loose_commit(&t.open(&p), "feature");
    let marker = loose_commit(&t.open(&users), "marker");
    let moved = loose_commit(&t.open(&users), "moved");

    let legacy = t.legacy();
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(
        cid(1),
        StageRefsOp {
            refs: vec![
                (p.clone(), FEATURE.to_string(), Some(feature)),
                (users.clone(), MARKER.to_string(), Some(marker)),
            ],
            vote: vote(1),
        },
    );
    batch.set_listener(SabotageListener {
        repo: users.clone(),
        repo_path: repos.path_of(&users),
        name: MARKER.to_string(),
        target: moved,
    });
    let err = batch.execute().unwrap_err();

    let TransactionError::Compensation(failure) = &err else {
        panic!("expected compensation failure, got {err:?}");
    };
    assert_eq!(failure.repos(), vec![users.clone()]);
    assert!(failure.unrestored.iter().any(|u| u.name == MARKER));
    assert_eq!(read_ref(&t.open(&users), MARKER).unwrap(), Some(moved));
    // The second repository was never written.
    assert_eq!(read_ref(&t.open(&p), FEATURE).unwrap(), None);

    let err: Error = err.into();
    assert_eq!(err.effect(), Effect::Some);
}

#[test]
fn expired_deadline_writes_nothing() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(300)), ts(50_000));
    batch.add_op(cid(1), vote(1));
    batch.set_timeout(Duration::ZERO);
    let err = batch.execute().unwrap_err();

    assert!(matches!(err, TransactionError::Timeout { phase: "open" }));
    assert!(t.legacy().read_bundle(cid(1)).unwrap().approvals.is_empty());
}

#[test]
fn leased_change_rejects_writers() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));

    let change = t.change(1);
    let until = Timestamp::now().saturating_add(Duration::from_secs(3_600));
    let state = t.state(1).with_read_only_until(Some(until));
    let mut row = change.clone();
    row.note_db_state = Some(state.to_token().unwrap());
    let mut writes = LegacyWrites::default();
    writes.changes.push(ChangeWrite::Update {
        change: row,
        expected_version: change.row_version,
    });
    t.commit_rows(writes);

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::Write,
        Some(account(300)),
        Timestamp::now(),
    );
    batch.add_op(cid(1), vote(1));
    let err = batch.execute().unwrap_err();

    match err {
        TransactionError::ReadOnly { change, until: got } => {
            assert_eq!(change.id, cid(1));
            assert_eq!(got, until);
        }
        other => panic!("expected read-only, got {other:?}"),
    }
}

#[test]
fn failing_op_leaves_change_untouched() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let version = t.change(1).row_version;

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Write, Some(account(300)), ts(50_000));
    batch.add_op(cid(1), vote(1)).add_op(cid(1), FailingOp);
    let err = batch.execute().unwrap_err();

    assert!(matches!(
        err,
        TransactionError::Op {
            phase: "update_change",
            ..
        }
    ));
    assert_eq!(t.change(1).row_version, version);
    assert!(t.legacy().read_bundle(cid(1)).unwrap().approvals.is_empty());
}

#[test]
fn missing_change_is_reported() {
    let t = TestSite::new();
    t.project("p");
    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Write, Some(account(300)), ts(50_000));
    batch.add_op(cid(42), vote(1));
    let err = batch.execute().unwrap_err();
    assert!(matches!(err, TransactionError::ChangeNotFound(id) if id == cid(42)));
}

fn new_change(p: &RepoName, id: u32) -> Change {
    Change {
        id: cid(id),
        repo: p.clone(),
        branch: "refs/heads/main".to_string(),
        subject: "Fresh change".to_string(),
        owner: account(100),
        status: ChangeStatus::New,
        current_patch_set: None,
        created_on: ts(60_000),
        last_updated_on: ts(60_000),
        note_db_state: None,
        row_version: 0,
    }
}

#[test]
fn new_changes_start_notes_primary_late_in_migration() {
    let t = TestSite::new();
    let p = t.project("p");

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::ForceReadWrite,
        Some(account(100)),
        ts(60_000),
    );
    batch.insert_change(
        new_change(&p, 50),
        UploadOp {
            revision: "a".repeat(40),
            message: Some("Uploaded patch set 1."),
        },
    );
    batch.execute().unwrap();

    let state = t.state(50);
    assert_eq!(state.primary(), PrimaryStorage::Notes);
    let tip = t.meta_tip(50).expect("meta ref");
    let notes = read_change_state(&t.open(&p), tip).unwrap();
    assert_eq!(notes.subject, "Fresh change");
    assert!(notes.has_patch_set(ps(1)));
    assert_eq!(notes.messages.len(), 1);
    // Child rows live only in notes.
    assert!(t.legacy().read_bundle(cid(50)).unwrap().patch_sets.is_empty());
}

#[test]
fn new_changes_stay_legacy_before_migration() {
    let t = TestSite::new();
    let p = t.project("p");

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Off, Some(account(100)), ts(60_000));
    batch.insert_change(
        new_change(&p, 51),
        UploadOp {
            revision: "b".repeat(40),
            message: None,
        },
    );
    let result = batch.execute().unwrap();

    assert_eq!(result.ref_updates_applied, 0);
    assert_eq!(t.state(51).primary(), PrimaryStorage::Legacy);
    assert_eq!(t.meta_tip(51), None);
    let bundle = t.legacy().read_bundle(cid(51)).unwrap();
    assert_eq!(bundle.patch_sets.len(), 1);
    assert_eq!(bundle.change.current_patch_set, Some(ps(1)));
}

#[test]
fn drifted_meta_ref_is_detected() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    rebuild_all(&t);
    assert!(t.migrator().check(cid(1)).unwrap().up_to_date);

    force_ref(&t.open(&p), &meta_ref(cid(1)), None);
    assert!(!t.migrator().check(cid(1)).unwrap().up_to_date);
}

#[test]
fn legacy_primary_writes_are_refused_once_legacy_is_disabled() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let version = t.change(1).row_version;

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::NotesPrimary,
        Some(account(300)),
        ts(70_000),
    );
    batch.add_op(cid(1), vote(1));
    let err = batch.execute().unwrap_err();

    assert!(matches!(err, TransactionError::LegacyDisabled(ref key) if key.id == cid(1)));
    assert!(t.legacy().read_bundle(cid(1)).unwrap().approvals.is_empty());
    assert_eq!(t.change(1).row_version, version);
    assert_eq!(t.meta_tip(1), None);
}

#[test]
fn malformed_token_is_replaced_by_the_next_write() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let mut change = t.change(1);
    let expected_version = change.row_version;
    change.note_db_state = Some("{not json".to_string());
    let mut writes = LegacyWrites::default();
    writes.changes.push(ChangeWrite::Update {
        change,
        expected_version,
    });
    t.commit_rows(writes);

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch =
        BatchUpdate::new(&repos, &legacy, MigrationPhase::Write, Some(account(300)), ts(70_000));
    batch.add_op(cid(1), vote(2));
    batch.execute().unwrap();

    let parsed = ChangeState::parse(&t.change(1)).expect("token decodes");
    assert!(parsed.is_some());
    assert_eq!(t.state(1).primary(), PrimaryStorage::Legacy);
    assert!(t
        .legacy()
        .read_bundle(cid(1))
        .unwrap()
        .approvals
        .iter()
        .any(|a| a.account == account(300) && a.value == Some(2)));
}
