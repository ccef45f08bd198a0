//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data that does not belong to a site.
///
/// Uses `NOTEDB_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/notedb-rs` or
/// `~/.local/share/notedb-rs`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NOTEDB_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("notedb-rs")
}

/// Log directory used when no site is known.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Base directory for configuration files.
///
/// Uses `NOTEDB_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/notedb-rs` or
/// `~/.config/notedb-rs`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NOTEDB_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("notedb-rs")
}
