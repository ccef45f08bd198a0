use std::path::Path;

use notedb_rs::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(cli.verbose, cli.site.as_deref());

    if let Err(e) = cli::run(cli) {
        tracing::error!("error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8, site: Option<&Path>) -> telemetry::TelemetryGuard {
    let root = cli::site_root(site).ok();
    let cfg = match config::load(root.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config load failed, using defaults: {err}");
            let mut cfg = config::SiteConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    let mut telemetry_cfg = telemetry::TelemetryConfig::new(verbose, cfg.logging);
    if let Some(root) = root {
        telemetry_cfg = telemetry_cfg.with_default_log_dir(notedb_rs::site::Site::new(root).logs_dir());
    }
    telemetry::init(telemetry_cfg)
}
