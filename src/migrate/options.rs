use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::SiteConfig;
use crate::core::{ChangeId, RepoName};
use crate::legacy::ChangeFilter;
use crate::notes::ServerIdent;

use super::error::MigrationError;
use super::phase::MigrationPhase;

/// What one `migrate` or `rebuild` invocation should do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Stop at `Trial`; nothing becomes notes primary.
    pub trial: bool,
    /// Rebuild changes even when their notes copy is up to date.
    pub force_rebuild: bool,
    /// Overrides the configured worker count.
    pub threads: Option<usize>,
    pub changes: Vec<ChangeId>,
    pub repos: Vec<RepoName>,
    /// Highest phase to reach.
    pub stop_at: Option<MigrationPhase>,
    /// Persist `auto_migrate` so later startups resume the migration.
    pub auto_migrate: bool,
}

impl MigrateOptions {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if !self.changes.is_empty() && !self.repos.is_empty() {
            return Err(MigrationError::InvalidOptions(
                "changes and repos cannot be combined".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(MigrationError::InvalidOptions(
                "threads must be positive".into(),
            ));
        }
        Ok(())
    }

    /// A full migration always covers every change.
    pub fn validate_full(&self) -> Result<(), MigrationError> {
        self.validate()?;
        if !self.changes.is_empty() || !self.repos.is_empty() {
            return Err(MigrationError::InvalidOptions(
                "full migration covers every change; use rebuild for subsets".into(),
            ));
        }
        if self.trial && self.auto_migrate {
            return Err(MigrationError::InvalidOptions(
                "auto-migration cannot be used with trial mode".into(),
            ));
        }
        Ok(())
    }

    pub fn filter(&self) -> ChangeFilter {
        if !self.changes.is_empty() {
            ChangeFilter::Changes(self.changes.clone())
        } else if !self.repos.is_empty() {
            ChangeFilter::Repos(self.repos.clone())
        } else {
            ChangeFilter::All
        }
    }

    /// Phase the migration loop stops at.
    pub fn target(&self) -> MigrationPhase {
        let stop = self.stop_at.unwrap_or(MigrationPhase::NotesPrimary);
        if self.trial {
            stop.min(MigrationPhase::Trial)
        } else {
            stop
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigratorSettings {
    pub threads: usize,
    pub sequence_gap: u32,
    pub max_retries: usize,
    /// Length of the lease taken while a change changes primary storage.
    pub read_only_timeout: Duration,
    /// Safety margin a lease must still have left when the flip commits.
    pub read_only_skew: Duration,
    pub ident: ServerIdent,
}

impl MigratorSettings {
    pub fn from_config(config: &SiteConfig) -> Self {
        let notedb = &config.notedb;
        Self {
            threads: notedb.threads.max(1),
            sequence_gap: notedb.sequence_gap,
            max_retries: notedb.max_retries,
            read_only_timeout: Duration::from_millis(notedb.read_only_timeout_ms),
            read_only_skew: Duration::from_millis(notedb.read_only_skew_ms),
            ident: config.server.clone(),
        }
    }
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self::from_config(&SiteConfig::default())
    }
}

/// Shared flag checked between changes.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
