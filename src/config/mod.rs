//! Config loading and persistence.

mod error;
mod load;
mod merge;
mod schema;

pub use error::ConfigError;
pub use load::{
    config_path, load, load_or_default, load_site_config, load_user_config, read_layer,
    site_config_path, write_config, write_layer,
};
pub use merge::{apply_env_overrides, env_site_root, merge_layers};
pub use schema::{
    ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, LogFormat, LogRotation,
    LoggingConfig, LoggingConfigOverride, NotedbConfig, NotedbConfigOverride, ServerIdentOverride,
    SiteConfig,
};
