use std::fs;
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::merge::{apply_env_overrides, merge_layers};
use super::{ConfigLayer, SiteConfig};

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

pub fn site_config_path(site_root: &Path) -> PathBuf {
    site_root.join("etc").join("notedb.toml")
}

pub fn load_user_config() -> Result<Option<ConfigLayer>, ConfigError> {
    read_layer(&config_path())
}

pub fn load_site_config(site_root: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    read_layer(&site_config_path(site_root))
}

/// Read one layer; a missing file is an empty layer.
pub fn read_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Defaults, then the user file, then the site file, then the environment.
pub fn load(site_root: Option<&Path>) -> Result<SiteConfig, ConfigError> {
    let user = load_user_config()?;
    let site = match site_root {
        Some(root) => load_site_config(root)?,
        None => None,
    };
    let mut config = merge_layers(user, site);
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], falling back to defaults when a file is unreadable.
pub fn load_or_default(site_root: Option<&Path>) -> SiteConfig {
    match load(site_root) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            let mut config = SiteConfig::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

pub fn write_config(path: &Path, cfg: &SiteConfig) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(cfg)?;
    write_atomically(path, contents.as_bytes())
}

pub fn write_layer(path: &Path, layer: &ConfigLayer) -> Result<(), ConfigError> {
    let contents = toml::to_string_pretty(layer)?;
    write_atomically(path, contents.as_bytes())
}

fn write_atomically(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().ok_or_else(|| {
        write_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "config path missing parent directory",
        ))
    })?;
    fs::create_dir_all(dir).map_err(write_err)?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), data).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
