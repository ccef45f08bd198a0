//! `notedb` command line: site setup, migration, and per-change repair.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, builder::BoolishValueParser};
use serde_json::Value;

use crate::config;
use crate::site::Site;
use crate::Result;

mod commands;

use commands::{check, migrate, phase, primary, rebuild, sequence};

// =============================================================================
// Entry + global options
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "notedb",
    version,
    about = "Migrate review metadata from the legacy database into git",
    infer_subcommands = true,
    infer_long_args = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(
        long,
        global = true,
        default_value_t = false,
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub json: bool,

    /// Site root (default: $NOTEDB_SITE, then the current directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub site: Option<PathBuf>,

    /// More log output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the site layout: database, All-Users, All-Projects, config.
    Init,

    /// Walk the site through migration phases.
    Migrate(migrate::MigrateArgs),

    /// Rebuild the notes copy of some or all changes.
    Rebuild(rebuild::RebuildArgs),

    /// Show one change's storage state.
    #[command(alias = "status")]
    Check(check::CheckArgs),

    /// Show or set the site migration phase.
    Phase {
        #[command(subcommand)]
        cmd: phase::PhaseCmd,
    },

    /// Move one change between legacy and notes primary storage.
    Primary {
        #[command(subcommand)]
        cmd: primary::PrimaryCmd,
    },

    /// Change id sequence in All-Projects.
    #[command(alias = "seq")]
    Sequence {
        #[command(subcommand)]
        cmd: sequence::SequenceCmd,
    },
}

/// Parse args, accepting `--snake_case` spellings of long flags.
pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let raw: Vec<OsString> = args.into_iter().map(|t| t.into()).collect();
    Cli::parse_from(normalize_args(raw))
}

fn normalize_args(raw: Vec<OsString>) -> Vec<OsString> {
    raw.into_iter()
        .map(|arg| match arg.to_str() {
            Some(s) if s.starts_with("--") => {
                let (flag, value) = match s.split_once('=') {
                    Some((flag, value)) => (flag, Some(value)),
                    None => (s, None),
                };
                let flag = flag.replace('_', "-");
                match value {
                    Some(value) => OsString::from(format!("{flag}={value}")),
                    None => OsString::from(flag),
                }
            }
            _ => arg,
        })
        .collect()
}

/// Site the command acts on.
pub fn site_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = config::env_site_root() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?)
}

/// Run the CLI (used by bin).
pub fn run(cli: Cli) -> Result<()> {
    let ctx = Ctx {
        site: Site::new(site_root(cli.site.as_deref())?),
        json: cli.json,
    };

    // Commands that touch changes first finish a migration left running.
    if !matches!(
        cli.command,
        Commands::Init | Commands::Migrate(_) | Commands::Phase { .. }
    ) {
        migrate::resume(&ctx)?;
    }

    match cli.command {
        Commands::Init => commands::init::handle(&ctx),
        Commands::Migrate(args) => migrate::handle(&ctx, args),
        Commands::Rebuild(args) => rebuild::handle(&ctx, args),
        Commands::Check(args) => check::handle(&ctx, args),
        Commands::Phase { cmd } => phase::handle(&ctx, cmd),
        Commands::Primary { cmd } => primary::handle(&ctx, cmd),
        Commands::Sequence { cmd } => sequence::handle(&ctx, cmd),
    }
}

struct Ctx {
    site: Site,
    json: bool,
}

// =============================================================================
// Output
// =============================================================================

/// Print `value` as JSON, or the text rendering.
fn emit(ctx: &Ctx, value: Value, text: impl FnOnce() -> String) -> Result<()> {
    let s = if ctx.json {
        serde_json::to_string_pretty(&value)?
    } else {
        text()
    };
    print_line(&s)
}

fn print_line(s: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{s}")
        && e.kind() != std::io::ErrorKind::BrokenPipe
    {
        return Err(e.into());
    }
    Ok(())
}
