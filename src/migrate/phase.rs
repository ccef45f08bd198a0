//! Site-wide migration phase and what each phase enables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered steps from legacy-only to notes-only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPhase {
    #[default]
    Off,
    Write,
    ReadWrite,
    ReadWriteNoSequence,
    Trial,
    ForceReadWrite,
    NotesPrimary,
}

impl MigrationPhase {
    pub const ALL: [MigrationPhase; 7] = [
        MigrationPhase::Off,
        MigrationPhase::Write,
        MigrationPhase::ReadWrite,
        MigrationPhase::ReadWriteNoSequence,
        MigrationPhase::Trial,
        MigrationPhase::ForceReadWrite,
        MigrationPhase::NotesPrimary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::Off => "off",
            MigrationPhase::Write => "write",
            MigrationPhase::ReadWrite => "read-write",
            MigrationPhase::ReadWriteNoSequence => "read-write-no-sequence",
            MigrationPhase::Trial => "trial",
            MigrationPhase::ForceReadWrite => "force-read-write",
            MigrationPhase::NotesPrimary => "notes-primary",
        }
    }

    pub fn next(self) -> Option<MigrationPhase> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Batch updates dual-write notes commits for legacy-primary changes.
    pub fn writes_notes(self) -> bool {
        self >= MigrationPhase::Write
    }

    pub fn reads_notes(self) -> bool {
        self >= MigrationPhase::ReadWrite
    }

    /// New change ids come from the notes sequence ref.
    pub fn uses_notes_sequence(self) -> bool {
        self >= MigrationPhase::Trial
    }

    pub fn allows_primary_flip(self) -> bool {
        self >= MigrationPhase::ForceReadWrite
    }

    pub fn new_changes_notes_primary(self) -> bool {
        self >= MigrationPhase::ForceReadWrite
    }

    /// Legacy child rows are no longer written.
    pub fn legacy_disabled(self) -> bool {
        self == MigrationPhase::NotesPrimary
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown migration phase {0:?}")]
pub struct UnknownPhase(pub String);

impl FromStr for MigrationPhase {
    type Err = UnknownPhase;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == raw.trim())
            .ok_or_else(|| UnknownPhase(raw.to_string()))
    }
}
