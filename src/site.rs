//! On-disk layout of one review site.
//!
//! ```text
//! <root>/
//!   db/review.sqlite      legacy rows
//!   git/<name>.git        bare repositories, incl. All-Users and All-Projects
//!   etc/notedb.toml       site config layer
//!   logs/                 rolling log files
//! ```

use std::path::{Path, PathBuf};

use crate::config::{self, ConfigError, ConfigLayer, SiteConfig};
use crate::core::{LabelType, RepoName};
use crate::git::{GitError, RepoManager};
use crate::legacy::{LegacyError, SqliteLegacyStore};

/// Cheap handle on a site root; opens fresh connections on demand so every
/// worker thread gets its own.
#[derive(Clone, Debug)]
pub struct Site {
    root: PathBuf,
}

impl Site {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> PathBuf {
        self.root.join("git")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("db").join("review.sqlite")
    }

    pub fn config_path(&self) -> PathBuf {
        config::site_config_path(&self.root)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn repos(&self) -> RepoManager {
        RepoManager::new(self.git_dir())
    }

    pub fn open_legacy(&self) -> Result<SqliteLegacyStore, LegacyError> {
        SqliteLegacyStore::open(&self.db_path())
    }

    /// Defaults, user file, this site's file, environment.
    pub fn load_config(&self) -> Result<SiteConfig, ConfigError> {
        config::load(Some(&self.root))
    }

    /// Create the layout. Existing pieces are kept, so running twice is safe.
    pub fn init(&self) -> Result<(), SiteInitError> {
        let legacy = SqliteLegacyStore::create(&self.db_path())?;
        for label in default_labels() {
            legacy.define_label(&label)?;
        }

        let repos = self.repos();
        repos.open_or_create(&RepoName::all_users())?;
        repos.open_or_create(&RepoName::all_projects())?;

        let path = self.config_path();
        if !path.exists() {
            config::write_layer(&path, &ConfigLayer::default())?;
        }
        std::fs::create_dir_all(self.logs_dir()).map_err(|source| SiteInitError::Io {
            path: self.logs_dir(),
            source,
        })?;

        tracing::info!(site = %self.root.display(), "site initialized");
        Ok(())
    }
}

fn default_labels() -> [LabelType; 2] {
    [
        LabelType::new("Code-Review", -2, 2),
        LabelType::new("Verified", -1, 1),
    ]
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SiteInitError {
    #[error(transparent)]
    Legacy(#[from] LegacyError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
