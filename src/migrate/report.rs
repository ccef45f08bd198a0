use crate::core::{ChangeId, RepoName};

use super::phase::MigrationPhase;

/// What happened to one change in a migration pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Notes copy already current; nothing written.
    UpToDate,
    /// Change has no patch sets and so no history to convert.
    Empty,
    Rebuilt { ref_updates: usize },
    /// Now notes primary.
    Flipped { ref_updates: usize },
}

impl ChangeOutcome {
    pub fn ref_updates(self) -> usize {
        match self {
            ChangeOutcome::Rebuilt { ref_updates } | ChangeOutcome::Flipped { ref_updates } => {
                ref_updates
            }
            ChangeOutcome::UpToDate | ChangeOutcome::Empty => 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    /// Sorted by repository, then change.
    pub failed: Vec<(RepoName, ChangeId, String)>,
    pub cancelled: bool,
    pub ref_updates: usize,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationReport {
    pub start_phase: MigrationPhase,
    pub end_phase: MigrationPhase,
    /// Phases entered, in order.
    pub steps: Vec<MigrationPhase>,
    pub rebuild: Option<BulkReport>,
    pub repairs: Vec<BulkReport>,
    pub flip: Option<BulkReport>,
    /// First change id handed out by the notes sequence, if seeded here.
    pub sequence_seeded: Option<u32>,
}

impl MigrationReport {
    pub fn new(start: MigrationPhase) -> Self {
        Self {
            start_phase: start,
            end_phase: start,
            steps: Vec::new(),
            rebuild: None,
            repairs: Vec::new(),
            flip: None,
            sequence_seeded: None,
        }
    }

    /// Refs moved by every pass of this run, the sequence ref excluded.
    pub fn ref_updates(&self) -> usize {
        self.rebuild.iter().map(|r| r.ref_updates).sum::<usize>()
            + self.repairs.iter().map(|r| r.ref_updates).sum::<usize>()
            + self.flip.iter().map(|r| r.ref_updates).sum::<usize>()
    }
}
