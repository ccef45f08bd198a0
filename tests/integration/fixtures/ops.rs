//! Small batch ops and listeners for driving `BatchUpdate` in tests.

use std::path::PathBuf;

use git2::{Oid, Repository};

use notedb_rs::core::{ChangeId, PatchSetId, RepoName};
use notedb_rs::legacy::{ChangeWrite, LegacyStore, LegacyWrites, SqliteLegacyStore};
use notedb_rs::refs::RefUpdate;
use notedb_rs::update::{BatchUpdateListener, BatchUpdateOp, ChangeContext, OpError, RepoContext};

/// Cast one vote as the batch user.
pub struct VoteOp {
    pub patch_set: PatchSetId,
    pub label: &'static str,
    pub value: Option<i16>,
}

impl BatchUpdateOp for VoteOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        ctx.post_vote(self.patch_set, self.label, self.value)?;
        Ok(true)
    }
}

/// Upload a patch set, optionally with a review message.
pub struct UploadOp {
    pub revision: String,
    pub message: Option<&'static str>,
}

impl BatchUpdateOp for UploadOp {
    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        let id = ctx.add_patch_set(self.revision.clone())?;
        if let Some(text) = self.message {
            ctx.add_message(Some(id), text);
        }
        Ok(true)
    }
}

/// Stage ref writes in `update_repo`, then vote.
pub struct StageRefsOp {
    pub refs: Vec<(RepoName, String, Option<Oid>)>,
    pub vote: VoteOp,
}

impl BatchUpdateOp for StageRefsOp {
    fn update_repo(&mut self, ctx: &mut RepoContext<'_>) -> Result<(), OpError> {
        for (repo, name, target) in &self.refs {
            ctx.repo(repo)?.stage(name, *target)?;
        }
        Ok(())
    }

    fn update_change(&mut self, ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        self.vote.update_change(ctx)
    }
}

pub struct FailingOp;

impl BatchUpdateOp for FailingOp {
    fn update_change(&mut self, _ctx: &mut ChangeContext<'_>) -> Result<bool, OpError> {
        Err(OpError::msg("op refused"))
    }
}

/// Moves a ref between staging and commit, like a concurrent writer would.
pub struct RaceListener {
    pub repo_path: PathBuf,
    pub name: String,
    pub target: Oid,
}

impl BatchUpdateListener for RaceListener {
    fn after_update_changes(&mut self) -> Result<(), OpError> {
        let repo = Repository::open_bare(&self.repo_path)?;
        repo.reference(&self.name, self.target, true, "racing writer")?;
        Ok(())
    }
}

/// After `repo` is written, moves one of its refs again and then fails, so
/// the rollback of that repository cannot succeed.
pub struct SabotageListener {
    pub repo: RepoName,
    pub repo_path: PathBuf,
    pub name: String,
    pub target: Oid,
}

impl BatchUpdateListener for SabotageListener {
    fn after_ref_updates(&mut self, repo: &RepoName, _updates: &[RefUpdate]) -> Result<(), OpError> {
        if *repo != self.repo {
            return Ok(());
        }
        let handle = Repository::open_bare(&self.repo_path)?;
        handle.reference(&self.name, self.target, true, "sabotage")?;
        Err(OpError::msg("listener failed after ref updates"))
    }
}

/// Fails the batch right after the ref transaction of `repo`.
pub struct FailAfterRepo {
    pub repo: RepoName,
}

impl BatchUpdateListener for FailAfterRepo {
    fn after_ref_updates(&mut self, repo: &RepoName, _updates: &[RefUpdate]) -> Result<(), OpError> {
        if *repo == self.repo {
            return Err(OpError::msg("injected failure"));
        }
        Ok(())
    }
}

/// Bumps the change row from another connection once ops have run, so the
/// batch's own row write loses.
pub struct BumpRowListener {
    pub db: PathBuf,
    pub change: ChangeId,
}

impl BatchUpdateListener for BumpRowListener {
    fn after_update_changes(&mut self) -> Result<(), OpError> {
        let legacy = SqliteLegacyStore::open(&self.db)?;
        let change = legacy
            .read_change(self.change)?
            .ok_or_else(|| OpError::msg("change vanished"))?;
        let expected_version = change.row_version;
        let mut writes = LegacyWrites::default();
        writes.changes.push(ChangeWrite::Update {
            change,
            expected_version,
        });
        legacy.commit(&writes)?;
        Ok(())
    }
}
