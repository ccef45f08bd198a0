use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::migrate::MigrationPhase;
use crate::notes::ServerIdent;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub logging: LoggingConfig,
    pub notedb: NotedbConfig,
    pub server: ServerIdent,
}

/// Migration settings under `[notedb]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotedbConfig {
    pub phase: MigrationPhase,
    /// Migrate without flipping any change to notes primary.
    pub trial: bool,
    /// Run pending migration on startup of long-lived processes.
    pub auto_migrate: bool,
    pub threads: usize,
    /// Distance kept between the largest legacy id and the first sequence id.
    pub sequence_gap: u32,
    pub max_retries: usize,
    pub read_only_timeout_ms: u64,
    pub read_only_skew_ms: u64,
}

impl Default for NotedbConfig {
    fn default() -> Self {
        Self {
            phase: MigrationPhase::Off,
            trial: false,
            auto_migrate: false,
            threads: 4,
            sequence_gap: 1_000,
            max_retries: 3,
            read_only_timeout_ms: 60_000,
            read_only_skew_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    /// Defaults to the site's `logs` directory.
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_age_days: Some(7),
            retention_max_files: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_format: Option<LogFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = self.file.as_ref() {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<LogRotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_max_age_days: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = self.dir.as_ref() {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if let Some(days) = self.retention_max_age_days {
            target.retention_max_age_days = Some(days);
        }
        if let Some(files) = self.retention_max_files {
            target.retention_max_files = Some(files);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NotedbConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<MigrationPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_migrate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_gap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_skew_ms: Option<u64>,
}

impl NotedbConfigOverride {
    pub fn apply_to(&self, target: &mut NotedbConfig) {
        if let Some(phase) = self.phase {
            target.phase = phase;
        }
        if let Some(trial) = self.trial {
            target.trial = trial;
        }
        if let Some(auto_migrate) = self.auto_migrate {
            target.auto_migrate = auto_migrate;
        }
        if let Some(threads) = self.threads {
            target.threads = threads;
        }
        if let Some(gap) = self.sequence_gap {
            target.sequence_gap = gap;
        }
        if let Some(retries) = self.max_retries {
            target.max_retries = retries;
        }
        if let Some(timeout) = self.read_only_timeout_ms {
            target.read_only_timeout_ms = timeout;
        }
        if let Some(skew) = self.read_only_skew_ms {
            target.read_only_skew_ms = skew;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerIdentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_domain: Option<String>,
}

impl ServerIdentOverride {
    pub fn apply_to(&self, target: &mut ServerIdent) {
        if let Some(name) = self.name.as_ref() {
            target.name = name.clone();
        }
        if let Some(email) = self.email.as_ref() {
            target.email = email.clone();
        }
        if let Some(domain) = self.account_domain.as_ref() {
            target.account_domain = domain.clone();
        }
    }
}

/// One config file: every field optional, applied over the layers below it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub logging: LoggingConfigOverride,
    pub notedb: NotedbConfigOverride,
    pub server: ServerIdentOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut SiteConfig) {
        self.logging.apply_to(&mut base.logging);
        self.notedb.apply_to(&mut base.notedb);
        self.server.apply_to(&mut base.server);
    }
}
