use notedb_rs::core::{ApprovalRow, ChangeStatus, CommentStatus, RepoName};
use notedb_rs::legacy::{LegacyStore, LegacyWrites};
use notedb_rs::migrate::{CancelToken, MigrateOptions, MigrationPhase, MigratorSettings};
use notedb_rs::notes::{ServerIdent, read_drafts_state};
use notedb_rs::rebuild::{NotesSource, RebuildError, Rebuilder};
use notedb_rs::refs::{draft_ref, meta_ref, read_ref};

use crate::fixtures::{ChangeSeed, TestSite, account, cid, force_ref, ps, ts};

fn rebuilder() -> Rebuilder {
    Rebuilder::new(ServerIdent::default())
}

#[test]
fn rebuild_is_deterministic_and_touches_no_refs() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(
        ChangeSeed::new(&p, 1)
            .patch_sets(2)
            .vote(200, 2, "Code-Review", Some(2))
            .message(Some(200), "Looks good")
            .comment(201, "nit: spacing", CommentStatus::Published),
    );

    let (legacy, repos) = (t.legacy(), t.repos());
    let first = rebuilder().rebuild(&legacy, &repos, cid(1)).unwrap();
    let second = rebuilder().rebuild(&legacy, &repos, cid(1)).unwrap();

    assert_eq!(first.meta_commits, second.meta_commits);
    assert_eq!(first.projection, second.projection);
    assert_eq!(t.meta_tip(1), None);

    assert_eq!(first.ref_updates.len(), 1);
    let update = &first.ref_updates[0];
    assert_eq!(update.name, meta_ref(cid(1)));
    assert_eq!(update.expected_old, None);
    assert_eq!(update.new, first.meta_tip());
}

#[test]
fn later_rows_extend_history_without_rewriting_it() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Code-Review", Some(2)));

    let (legacy, repos) = (t.legacy(), t.repos());
    let before = rebuilder().rebuild(&legacy, &repos, cid(1)).unwrap();
    let tip = before.meta_tip().unwrap();
    let message = t.open(&p).find_commit(tip).unwrap().message().unwrap().to_string();
    assert!(
        message.contains("Label-Value: Code-Review=+2 by 200"),
        "unexpected message: {message}"
    );

    let mut writes = LegacyWrites::default();
    writes.approvals.push(ApprovalRow {
        row_id: 0,
        change: cid(1),
        patch_set: ps(1),
        account: account(201),
        label: "Code-Review".to_string(),
        value: Some(0),
        granted: ts(1_000 + 600),
    });
    t.commit_rows(writes);

    let after = rebuilder().rebuild(&legacy, &repos, cid(1)).unwrap();
    assert_eq!(after.meta_commits.len(), before.meta_commits.len() + 1);
    assert_eq!(
        &after.meta_commits[..before.meta_commits.len()],
        before.meta_commits.as_slice()
    );
}

#[test]
fn projection_reflects_legacy_rows() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(
        ChangeSeed::new(&p, 3)
            .patch_sets(2)
            .vote(200, 1, "Code-Review", Some(1))
            .vote(200, 2, "Code-Review", Some(2))
            .vote(201, 2, "Verified", Some(1))
            .vote(202, 2, "Code-Review", Some(0))
            .vote(203, 2, "Code-Review", None)
            .message(Some(200), "Ship it")
            .message(None, "Change has been successfully merged by Admin")
            .comment(201, "why?", CommentStatus::Published)
            .status(ChangeStatus::Merged),
    );

    let result = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(3))
        .unwrap();
    let notes = &result.projection;

    assert_eq!(notes.subject, "Change 3");
    assert_eq!(notes.branch, "refs/heads/main");
    assert_eq!(notes.owner, Some(account(100)));
    assert_eq!(notes.status, ChangeStatus::Merged);
    assert_eq!(notes.current_patch_set, Some(ps(2)));
    assert_eq!(notes.patch_sets.len(), 2);

    assert_eq!(notes.approval(ps(1), "Code-Review", account(200)), Some(1));
    assert_eq!(notes.approval(ps(2), "Code-Review", account(200)), Some(2));
    assert_eq!(notes.approval(ps(2), "Verified", account(201)), Some(1));
    // A deleted vote is gone; a score-less reviewer is still a reviewer.
    assert_eq!(notes.approval(ps(2), "Code-Review", account(202)), None);
    assert_eq!(notes.approval(ps(2), "Code-Review", account(203)), None);
    assert!(notes.reviewers.contains(&account(202)));
    assert!(notes.reviewers.contains(&account(203)));

    assert_eq!(notes.messages.len(), 2);
    assert_eq!(notes.messages[1].author, None);
    assert_eq!(notes.comments.len(), 1);
    assert_eq!(notes.comments[0].message, "why?");
}

#[test]
fn out_of_range_vote_is_corrupt() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Code-Review", Some(5)));

    let err = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(1))
        .unwrap_err();
    let RebuildError::CorruptLegacyData(corrupt) = err else {
        panic!("expected corrupt data, got {err:?}");
    };
    assert_eq!(corrupt.change.id, cid(1));
    assert!(corrupt.row.starts_with("approvals/"), "row: {}", corrupt.row);
    assert!(corrupt.reason.contains("outside"));
}

#[test]
fn unknown_label_is_corrupt() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Library-Compliance", Some(1)));

    let err = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(1))
        .unwrap_err();
    assert!(
        matches!(&err, RebuildError::CorruptLegacyData(c) if c.reason.contains("Library-Compliance")),
        "got {err:?}"
    );
}

#[test]
fn change_without_patch_sets_is_refused() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).patch_sets(0));

    let err = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(1))
        .unwrap_err();
    assert!(matches!(err, RebuildError::NoPatchSets(key) if key.id == cid(1)));
}

#[test]
fn drafts_are_routed_to_all_users() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(
        ChangeSeed::new(&p, 1)
            .comment(300, "half-finished thought", CommentStatus::Draft)
            .comment(201, "published", CommentStatus::Published),
    );

    let result = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(1))
        .unwrap();
    assert_eq!(result.projection.comments.len(), 1);
    assert!(result.draft_commits.contains_key(&account(300)));
    let users = RepoName::all_users();
    let draft = draft_ref(cid(1), account(300));
    assert!(result
        .ref_updates
        .iter()
        .any(|u| u.repo == users && u.name == draft));
    assert!(result.new_ref_state.get(&users, &draft).is_some());

    t.migrator()
        .rebuild(&MigrateOptions::default(), &CancelToken::new())
        .unwrap();
    let all_users = t.open(&users);
    let tip = read_ref(&all_users, &draft).unwrap().expect("draft ref written");
    let drafts = read_drafts_state(&all_users, tip).unwrap();
    assert_eq!(drafts.account, account(300));
    assert_eq!(drafts.comments.len(), 1);
    assert_eq!(drafts.comments[0].message, "half-finished thought");
}

#[test]
fn read_path_rebuilds_stale_changes_in_memory() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1).vote(200, 1, "Verified", Some(-1)));
    let migrator = t.migrator();

    let loaded = migrator.load_change_notes(cid(1)).unwrap();
    assert_eq!(loaded.source, NotesSource::Rebuilt);
    assert_eq!(loaded.state.approval(ps(1), "Verified", account(200)), Some(-1));
    assert_eq!(t.meta_tip(1), None);

    migrator
        .rebuild(&MigrateOptions::default(), &CancelToken::new())
        .unwrap();
    let stored = migrator.load_change_notes(cid(1)).unwrap();
    assert_eq!(stored.source, NotesSource::Stored);
    assert_eq!(stored.state, loaded.state);
}

#[test]
fn notes_primary_changes_are_never_rebuilt_from_rows() {
    let t = TestSite::new();
    let p = t.project("p");
    t.seed(ChangeSeed::new(&p, 1));
    let migrator = t.migrator_with(MigrationPhase::ForceReadWrite, MigratorSettings::default());
    migrator.migrate_to_notes_primary(cid(1)).unwrap();

    let err = rebuilder()
        .rebuild(&t.legacy(), &t.repos(), cid(1))
        .unwrap_err();
    assert!(matches!(err, RebuildError::NotesPrimary(_)));

    force_ref(&t.open(&p), &meta_ref(cid(1)), None);
    let err = migrator.load_change_notes(cid(1)).unwrap_err();
    assert!(
        err.to_string().contains("stale"),
        "expected stale notes-primary error, got {err}"
    );
    assert!(t.legacy().read_change(cid(1)).unwrap().is_some());
}
