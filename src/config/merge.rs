use std::path::PathBuf;

use super::{ConfigLayer, SiteConfig};

pub fn merge_layers(user: Option<ConfigLayer>, site: Option<ConfigLayer>) -> SiteConfig {
    let mut config = SiteConfig::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = site {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut SiteConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(
    config: &mut SiteConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(raw) = lookup("NOTEDB_THREADS") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<usize>() {
                Ok(0) => tracing::warn!("NOTEDB_THREADS must be positive, ignoring"),
                Ok(value) => config.notedb.threads = value,
                Err(err) => tracing::warn!("invalid NOTEDB_THREADS, ignoring: {err}"),
            }
        }
    }

    if let Some(value) = parse_bool("NOTEDB_TRIAL", lookup("NOTEDB_TRIAL")) {
        config.notedb.trial = value;
    }
    if let Some(value) = parse_bool("NOTEDB_AUTO_MIGRATE", lookup("NOTEDB_AUTO_MIGRATE")) {
        config.notedb.auto_migrate = value;
    }
}

/// Site root from `NOTEDB_SITE`, if set.
pub fn env_site_root() -> Option<PathBuf> {
    std::env::var("NOTEDB_SITE")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_bool(key: &str, raw: Option<String>) -> Option<bool> {
    let raw = raw?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => None,
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!("invalid {key}={other:?}, ignoring");
            None
        }
    }
}
