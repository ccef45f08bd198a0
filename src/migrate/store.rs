use std::path::{Path, PathBuf};

use crate::config::{ConfigError, read_layer, write_layer};
use crate::site::Site;

use super::error::MigrationError;
use super::phase::MigrationPhase;

/// Migration phase persisted in the site config file.
#[derive(Clone, Debug)]
pub struct PhaseStore {
    path: PathBuf,
}

impl PhaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_site(site: &Site) -> Self {
        Self::new(site.config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<MigrationPhase, ConfigError> {
        Ok(read_layer(&self.path)?
            .and_then(|layer| layer.notedb.phase)
            .unwrap_or_default())
    }

    /// Write `new` iff the file still holds `expected_old`. Other settings in
    /// the file are kept.
    pub fn save(
        &self,
        expected_old: MigrationPhase,
        new: MigrationPhase,
    ) -> Result<(), MigrationError> {
        let mut layer = read_layer(&self.path)?.unwrap_or_default();
        let actual = layer.notedb.phase.unwrap_or_default();
        if actual != expected_old {
            return Err(MigrationError::PhaseMismatch {
                expected: expected_old,
                actual,
            });
        }
        layer.notedb.phase = Some(new);
        write_layer(&self.path, &layer)?;
        tracing::info!(from = %expected_old, to = %new, "migration phase saved");
        Ok(())
    }

    pub fn set_auto_migrate(&self, enabled: bool) -> Result<(), ConfigError> {
        let mut layer = read_layer(&self.path)?.unwrap_or_default();
        if layer.notedb.auto_migrate == Some(enabled) {
            return Ok(());
        }
        layer.notedb.auto_migrate = Some(enabled);
        write_layer(&self.path, &layer)
    }
}
