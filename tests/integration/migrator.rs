use std::time::Duration;

use notedb_rs::core::ApprovalRow;
use notedb_rs::legacy::{ChangeWrite, LegacyStore, LegacyWrites};
use notedb_rs::migrate::{
    CancelToken, ChangeOutcome, MigrateOptions, MigrationError, MigrationPhase, MigratorSettings,
};
use notedb_rs::notes::{primary_marker, read_change_state};
use notedb_rs::refs::meta_ref;
use notedb_rs::state::PrimaryStorage;
use notedb_rs::update::BatchUpdate;

use crate::fixtures::ops::{UploadOp, VoteOp};
use crate::fixtures::{ChangeSeed, TestSite, account, cid, force_ref, ps, ts};

fn run(t: &TestSite, options: MigrateOptions) -> Result<notedb_rs::migrate::MigrationReport, MigrationError> {
    t.migrator().migrate(&options, &CancelToken::new())
}

fn trial() -> MigrateOptions {
    MigrateOptions {
        trial: true,
        ..MigrateOptions::default()
    }
}

fn stop_at(phase: MigrationPhase) -> MigrateOptions {
    MigrateOptions {
        stop_at: Some(phase),
        ..MigrateOptions::default()
    }
}

#[test]
fn full_migration_flips_every_change() {
    let t = TestSite::new();
    let p = t.project("p");
    let q = t.project("q");
    t.seed_many(&p, 2);
    t.seed(ChangeSeed::new(&q, 3).vote(201, 1, "Verified", Some(1)));
    t.seed(ChangeSeed::new(&q, 4).patch_sets(0));

    let report = run(&t, MigrateOptions::default()).unwrap();

    assert_eq!(report.start_phase, MigrationPhase::Off);
    assert_eq!(report.end_phase, MigrationPhase::NotesPrimary);
    assert_eq!(report.steps.len(), 6);
    assert_eq!(t.phase(), MigrationPhase::NotesPrimary);
    assert_eq!(report.sequence_seeded, Some(4 + 1 + 1_000));
    assert!(report.rebuild.as_ref().unwrap().is_clean());
    assert!(report.flip.as_ref().unwrap().is_clean());

    let migrator = t.migrator();
    for id in 1..=3 {
        let check = migrator.check(cid(id)).unwrap();
        assert_eq!(check.primary, PrimaryStorage::Notes, "change {id}");
        assert!(check.up_to_date, "change {id}");
        assert_eq!(check.read_only_until, None);
        let repo = t.open(&check.key.repo);
        let tip = check.meta_tip.unwrap();
        assert_eq!(primary_marker(&repo, tip).unwrap(), Some(PrimaryStorage::Notes));
    }
    // No patch sets: only the create commit sits under the marker.
    let empty = migrator.check(cid(4)).unwrap();
    assert_eq!(empty.primary, PrimaryStorage::Notes);
    assert!(empty.up_to_date);
    assert_eq!(t.state(4).marker(), empty.meta_tip);
    let tip = empty.meta_tip.unwrap();
    let repo = t.open(&q);
    assert_eq!(primary_marker(&repo, tip).unwrap(), Some(PrimaryStorage::Notes));
    assert_eq!(repo.find_commit(tip).unwrap().parent_count(), 1);
    assert!(!t.site.load_config().unwrap().notedb.auto_migrate);
}

#[test]
fn trial_then_full_only_writes_markers() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);

    let report = run(&t, trial()).unwrap();
    assert_eq!(report.end_phase, MigrationPhase::Trial);
    assert_eq!(report.rebuild.as_ref().unwrap().ref_updates, 2);
    assert_eq!(report.sequence_seeded, None);

    let mut tips = Vec::new();
    for id in 1..=2 {
        let state = t.state(id);
        assert_eq!(state.primary(), PrimaryStorage::Legacy);
        assert!(t.migrator().check(cid(id)).unwrap().up_to_date);
        tips.push(t.meta_tip(id).unwrap());
    }

    let report = run(&t, MigrateOptions::default()).unwrap();
    assert_eq!(
        report.steps,
        vec![MigrationPhase::ForceReadWrite, MigrationPhase::NotesPrimary]
    );
    assert!(report.rebuild.is_none());
    assert!(report.repairs.is_empty());
    assert_eq!(report.sequence_seeded, Some(2 + 1 + 1_000));
    assert_eq!(report.flip.as_ref().unwrap().ref_updates, 2);
    assert_eq!(report.ref_updates(), 2);

    let repo = t.open(&p);
    for (id, before) in (1..=2).zip(tips) {
        assert_eq!(t.state(id).primary(), PrimaryStorage::Notes);
        let tip = t.meta_tip(id).unwrap();
        let commit = repo.find_commit(tip).unwrap();
        assert_eq!(commit.parent_id(0).unwrap(), before);
    }
}

#[test]
fn rerunning_a_finished_migration_does_nothing() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 3);
    run(&t, MigrateOptions::default()).unwrap();
    let tips: Vec<_> = (1..=3).map(|id| t.meta_tip(id)).collect();

    let report = run(&t, MigrateOptions::default()).unwrap();
    assert!(report.steps.is_empty());
    assert_eq!(report.ref_updates(), 0);
    assert_eq!(report.end_phase, MigrationPhase::NotesPrimary);
    assert_eq!((1..=3).map(|id| t.meta_tip(id)).collect::<Vec<_>>(), tips);

    let err = run(&t, trial()).unwrap_err();
    assert!(matches!(err, MigrationError::TrialPastTrial(MigrationPhase::NotesPrimary)));
}

#[test]
fn corrupt_change_blocks_read_write() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    t.seed(ChangeSeed::new(&p, 2).vote(200, 1, "Code-Review", Some(7)));
    t.seed(ChangeSeed::new(&p, 3));

    let err = run(&t, MigrateOptions::default()).unwrap_err();
    assert!(matches!(err, MigrationError::RebuildFailures { failed: 1 }));
    assert_eq!(t.phase(), MigrationPhase::Write);

    let migrator = t.migrator();
    assert!(migrator.check(cid(1)).unwrap().up_to_date);
    assert!(!migrator.check(cid(2)).unwrap().up_to_date);
    assert!(migrator.check(cid(3)).unwrap().up_to_date);

    let report = migrator
        .rebuild(&MigrateOptions::default(), &CancelToken::new())
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1, cid(2));
}

#[test]
fn promotion_guard_repairs_drifted_changes() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);
    run(&t, stop_at(MigrationPhase::ReadWrite)).unwrap();
    assert_eq!(t.phase(), MigrationPhase::ReadWrite);

    force_ref(&t.open(&p), &meta_ref(cid(1)), None);
    assert_eq!(t.migrator().stale_changes().unwrap().len(), 1);

    let report = run(&t, stop_at(MigrationPhase::Trial)).unwrap();
    assert_eq!(report.end_phase, MigrationPhase::Trial);
    assert_eq!(report.repairs.len(), 1);
    assert_eq!(report.repairs[0].succeeded, 1);
    assert!(t.migrator().check(cid(1)).unwrap().up_to_date);
}

#[test]
fn promotion_guard_refuses_unrepairable_changes() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);
    run(&t, stop_at(MigrationPhase::ReadWrite)).unwrap();

    let mut writes = LegacyWrites::default();
    writes.approvals.push(ApprovalRow {
        row_id: 0,
        change: cid(1),
        patch_set: ps(1),
        account: account(900),
        label: "Code-Review".to_string(),
        value: Some(9),
        granted: ts(5_000),
    });
    t.commit_rows(writes);
    force_ref(&t.open(&p), &meta_ref(cid(1)), None);

    let err = run(&t, MigrateOptions::default()).unwrap_err();
    let MigrationError::StaleChanges(stale) = err else {
        panic!("expected stale changes, got {err:?}");
    };
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, cid(1));
    assert_eq!(t.phase(), MigrationPhase::ReadWrite);
}

#[test]
fn cancellation_stops_before_the_next_step() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 3);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut migrator = t.migrator();
    let err = migrator.migrate(&MigrateOptions::default(), &cancel).unwrap_err();
    assert!(matches!(err, MigrationError::Cancelled));
    assert_eq!(t.phase(), MigrationPhase::Off);

    let report = migrator.rebuild(&MigrateOptions::default(), &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.attempted, 0);
    assert_eq!(t.meta_tip(1), None);
}

#[test]
fn expired_lease_leaves_change_legacy_primary() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let settings = MigratorSettings {
        read_only_timeout: Duration::ZERO,
        ..MigratorSettings::default()
    };
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, settings);

    let err = migrator.migrate_to_notes_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::LeaseExpired(key) if key.id == cid(1)));

    let state = t.state(1);
    assert_eq!(state.primary(), PrimaryStorage::Legacy);
    assert_eq!(state.read_only_until(), None);
    assert_eq!(t.meta_tip(1), None);
}

#[test]
fn flipping_needs_a_late_enough_phase() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let migrator = t.migrator_with(MigrationPhase::Trial, MigratorSettings::default());
    let err = migrator.migrate_to_notes_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::PhaseDisallowsFlip(MigrationPhase::Trial)));
}

#[test]
fn single_change_flip_and_rollback() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Code-Review", Some(2)));
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, MigratorSettings::default());

    let outcome = migrator.migrate_to_notes_primary(cid(1)).unwrap();
    assert!(matches!(outcome, ChangeOutcome::Flipped { ref_updates: 1 }));
    assert_eq!(t.state(1).primary(), PrimaryStorage::Notes);
    // Already notes primary and current.
    assert_eq!(
        migrator.migrate_to_notes_primary(cid(1)).unwrap(),
        ChangeOutcome::UpToDate
    );

    migrator.migrate_to_legacy_primary(cid(1)).unwrap();
    let check = migrator.check(cid(1)).unwrap();
    assert_eq!(check.primary, PrimaryStorage::Legacy);
    assert!(check.up_to_date);
    let tip = check.meta_tip.unwrap();
    assert_eq!(
        primary_marker(&t.open(&p), tip).unwrap(),
        Some(PrimaryStorage::Legacy)
    );

    let err = migrator.migrate_to_legacy_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::NotNotesPrimary(_)));
}

#[test]
fn rollback_refuses_changes_written_after_the_flip() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, MigratorSettings::default());
    migrator.migrate_to_notes_primary(cid(1)).unwrap();

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::ForceReadWrite,
        Some(account(300)),
        ts(90_000),
    );
    batch.add_op(
        cid(1),
        VoteOp {
            patch_set: ps(1),
            label: "Code-Review",
            value: Some(1),
        },
    );
    batch.execute().unwrap();

    let err = migrator.migrate_to_legacy_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::NoNotesMarker(_)));
    assert_eq!(t.state(1).primary(), PrimaryStorage::Notes);
}

#[test]
fn legacy_storage_is_closed_once_notes_primary() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    run(&t, MigrateOptions::default()).unwrap();

    let err = t.migrator().migrate_to_legacy_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::LegacyDisabled(MigrationPhase::NotesPrimary)));
}

#[test]
fn change_ids_come_from_the_sequence_after_trial() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 3);

    assert_eq!(t.migrator().allocate_change_id().unwrap(), cid(4));

    run(&t, trial()).unwrap();
    let migrator = t.migrator();
    assert_eq!(migrator.phase(), MigrationPhase::Trial);
    assert_eq!(migrator.allocate_change_id().unwrap(), cid(1_004));
    assert_eq!(migrator.allocate_change_id().unwrap(), cid(1_005));
    // Seeding again never moves the sequence backwards.
    assert_eq!(migrator.seed_sequence().unwrap(), 1_006);
}

#[test]
fn set_phase_only_steps_back_safely_without_force() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 1);
    run(&t, stop_at(MigrationPhase::ReadWrite)).unwrap();

    let mut migrator = t.migrator();
    migrator.set_phase(MigrationPhase::Write, false).unwrap();
    assert_eq!(t.phase(), MigrationPhase::Write);

    let err = migrator.set_phase(MigrationPhase::Trial, false).unwrap_err();
    assert!(matches!(err, MigrationError::PhaseChangeRefused { .. }));

    migrator.set_phase(MigrationPhase::Trial, true).unwrap();
    assert_eq!(t.phase(), MigrationPhase::Trial);
}

#[test]
fn auto_migrate_resumes_until_done() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);

    let options = MigrateOptions {
        auto_migrate: true,
        stop_at: Some(MigrationPhase::Write),
        ..MigrateOptions::default()
    };
    run(&t, options).unwrap();
    assert!(t.site.load_config().unwrap().notedb.auto_migrate);

    let mut migrator = t.migrator();
    let report = migrator
        .auto_migrate(&CancelToken::new())
        .unwrap()
        .expect("migration resumed");
    assert_eq!(report.end_phase, MigrationPhase::NotesPrimary);
    assert!(!t.site.load_config().unwrap().notedb.auto_migrate);
    assert!(migrator.auto_migrate(&CancelToken::new()).unwrap().is_none());
}

#[test]
fn subsets_are_for_rebuild_only() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);

    let options = MigrateOptions {
        changes: vec![cid(2)],
        ..MigrateOptions::default()
    };
    let err = run(&t, options.clone()).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidOptions(_)));

    let report = t.migrator().rebuild(&options, &CancelToken::new()).unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(t.meta_tip(1), None);
    assert!(t.meta_tip(2).is_some());
}

#[test]
fn empty_change_is_flipped_and_keeps_later_uploads() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    t.seed(ChangeSeed::new(&p, 2).patch_sets(0));
    run(&t, MigrateOptions::default()).unwrap();
    assert_eq!(t.state(2).primary(), PrimaryStorage::Notes);
    let flipped = t.meta_tip(2).unwrap();

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::NotesPrimary,
        Some(account(300)),
        ts(90_000),
    );
    batch.add_op(
        cid(2),
        UploadOp {
            revision: "c".repeat(40),
            message: Some("First upload."),
        },
    );
    batch.execute().unwrap();

    let tip = t.meta_tip(2).unwrap();
    assert_ne!(tip, flipped);
    let notes = read_change_state(&t.open(&p), tip).unwrap();
    assert!(notes.has_patch_set(ps(1)));
    assert_eq!(notes.messages.len(), 1);
    assert!(t.legacy().read_bundle(cid(2)).unwrap().patch_sets.is_empty());
    assert!(t.migrator().check(cid(2)).unwrap().up_to_date);
}

#[test]
fn rollback_ignores_trailer_lookalikes_in_messages() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, MigratorSettings::default());
    migrator.migrate_to_notes_primary(cid(1)).unwrap();
    let marker = t.meta_tip(1).unwrap();
    assert_eq!(t.state(1).marker(), Some(marker));

    let (repos, legacy) = (t.repos(), t.legacy());
    let mut batch = BatchUpdate::new(
        &repos,
        &legacy,
        MigrationPhase::ForceReadWrite,
        Some(account(300)),
        ts(90_000),
    );
    batch.add_op(
        cid(1),
        UploadOp {
            revision: "d".repeat(40),
            message: Some("see notes\nPrimary-Storage: notes"),
        },
    );
    batch.execute().unwrap();

    let tip = t.meta_tip(1).unwrap();
    assert_ne!(tip, marker);
    assert_eq!(primary_marker(&t.open(&p), tip).unwrap(), None);
    assert_eq!(t.state(1).marker(), Some(marker));

    let err = migrator.migrate_to_legacy_primary(cid(1)).unwrap_err();
    assert!(matches!(err, MigrationError::NoNotesMarker(_)));
    assert_eq!(t.state(1).primary(), PrimaryStorage::Notes);
    assert_eq!(t.meta_tip(1), Some(tip));
}

#[test]
fn malformed_token_is_rebuilt_and_flipped() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Code-Review", Some(1)));
    let mut change = t.change(1);
    let expected_version = change.row_version;
    change.note_db_state = Some("{not json".to_string());
    let mut writes = LegacyWrites::default();
    writes.changes.push(ChangeWrite::Update {
        change,
        expected_version,
    });
    t.commit_rows(writes);
    assert_eq!(t.state(1).primary(), PrimaryStorage::Legacy);

    let report = t
        .migrator()
        .rebuild(&MigrateOptions::default(), &CancelToken::new())
        .unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.attempted, 1);
    assert!(t.migrator().check(cid(1)).unwrap().up_to_date);

    run(&t, MigrateOptions::default()).unwrap();
    let check = t.migrator().check(cid(1)).unwrap();
    assert_eq!(check.primary, PrimaryStorage::Notes);
    assert!(check.up_to_date);
    let notes = read_change_state(&t.open(&p), check.meta_tip.unwrap()).unwrap();
    assert_eq!(notes.approval(ps(1), "Code-Review", account(200)), Some(1));
}

#[test]
fn legacy_primary_changes_lists_what_blocks_promotion() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);
    t.seed(ChangeSeed::new(&p, 3).patch_sets(0));
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, MigratorSettings::default());
    migrator.migrate_to_notes_primary(cid(1)).unwrap();

    let remaining: Vec<_> = migrator
        .legacy_primary_changes()
        .unwrap()
        .into_iter()
        .map(|key| key.id)
        .collect();
    assert_eq!(remaining, vec![cid(2), cid(3)]);
}
