//! End-to-end runs of the `notedb` binary against a throwaway site.

use predicates::prelude::*;
use tempfile::TempDir;

use notedb_rs::migrate::MigrationPhase;
use notedb_rs::state::PrimaryStorage;

use crate::fixtures::TestSite;

struct Cli {
    env: TempDir,
}

impl Cli {
    fn new() -> Self {
        Self {
            env: TempDir::new().expect("create env dir"),
        }
    }

    fn cmd(&self, site: &std::path::Path) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("notedb");
        cmd.env("NOTEDB_CONFIG_DIR", self.env.path().join("config"))
            .env("NOTEDB_DATA_DIR", self.env.path().join("data"))
            .env_remove("NOTEDB_SITE")
            .env_remove("NOTEDB_TRIAL")
            .env_remove("NOTEDB_AUTO_MIGRATE")
            .env_remove("NOTEDB_THREADS")
            .arg("--site")
            .arg(site);
        cmd
    }
}

fn json_stdout(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn init_then_show_phase() {
    let cli = Cli::new();
    let dir = TempDir::new().unwrap();
    let site = dir.path().join("review");

    cli.cmd(&site)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("phase off"));

    let output = cli
        .cmd(&site)
        .args(["phase", "show", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value = json_stdout(&output);
    assert_eq!(value["phase"], "off");
    assert_eq!(value["writes_notes"], false);
}

#[test]
fn trial_migration_reports_json() {
    let cli = Cli::new();
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 2);

    let output = cli
        .cmd(t.root())
        .args(["migrate", "--trial", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value = json_stdout(&output);
    assert_eq!(value["start_phase"], "off");
    assert_eq!(value["end_phase"], "trial");
    assert_eq!(value["rebuild"]["succeeded"], 2);
    assert_eq!(t.phase(), MigrationPhase::Trial);

    // Flipping needs a later phase.
    cli.cmd(t.root())
        .args(["primary", "notes", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not allow"));
    assert_eq!(t.state(1).primary(), PrimaryStorage::Legacy);
}

#[test]
fn check_and_sequence_commands() {
    let cli = Cli::new();
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 3);

    let output = cli
        .cmd(t.root())
        .args(["check", "2", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value = json_stdout(&output);
    assert_eq!(value["primary"], "legacy");
    assert_eq!(value["up_to_date"], false);

    cli.cmd(t.root())
        .args(["seq", "next"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4"));
}

#[test]
fn unknown_phase_is_a_usage_error() {
    let cli = Cli::new();
    let t = TestSite::new();

    cli.cmd(t.root())
        .args(["phase", "set", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bogus"));
    assert_eq!(t.phase(), MigrationPhase::Off);
}

#[test]
fn forward_phase_jump_needs_force() {
    let cli = Cli::new();
    let t = TestSite::new();

    cli.cmd(t.root())
        .args(["phase", "set", "trial"])
        .assert()
        .failure();
    assert_eq!(t.phase(), MigrationPhase::Off);

    cli.cmd(t.root())
        .args(["phase", "set", "trial", "--force"])
        .assert()
        .success();
    assert_eq!(t.phase(), MigrationPhase::Trial);
}

#[test]
fn trial_migration_cannot_auto_migrate() {
    let cli = Cli::new();
    let t = TestSite::new();
    let p = t.project("p");
    t.seed_many(&p, 1);

    cli.cmd(t.root())
        .args(["migrate", "--trial", "--auto-migrate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with trial mode"));
    assert_eq!(t.phase(), MigrationPhase::Off);
    assert!(!t.site.load_config().unwrap().notedb.auto_migrate);
}
