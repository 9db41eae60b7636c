#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

mod commands;
mod logging;
mod watcher;

use clap::Parser;
use fastpack_core::config::{Config, CONFIG_FILE_NAME};
use fastpack_core::ConfigError;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "fastpack")]
#[command(author, version, about = "A rule-driven module bundler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file to use instead of fastpack.json in the working directory
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build every entry group once
    Build {
        /// Override the output directory
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },

    /// Rebuild to disk whenever a source file changes
    Watch,

    /// Serve build output from memory and rebuild on change
    Serve {
        /// Port to listen on (defaults to dev_server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to dev_server.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Explain which rules and stages apply to a file
    Rules {
        /// File to explain, relative to the working directory
        path: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    logging::init(cli.verbose, cli.json);

    let span = tracing::info_span!("fastpack", cwd = %cwd.display());
    let _guard = span.enter();

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Build { out_dir }) => {
            commands::build::run(&cwd, cli.config.as_deref(), out_dir.as_deref(), cli.json)
        }
        Some(Commands::Watch) => commands::watch::run(&cwd, cli.config.as_deref()),
        Some(Commands::Serve { port, host }) => {
            commands::serve::run(&cwd, cli.config.as_deref(), port, host)
        }
        Some(Commands::Rules { path }) => {
            commands::rules::run(&cwd, cli.config.as_deref(), &path, cli.json)
        }
    }
}

/// Load the config named by `--config`, or `fastpack.json` in `cwd`.
pub(crate) fn load_config(cwd: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => Config::load(&cwd.join(path)),
        None => Config::discover(cwd),
    }
}

/// Hint printed under configuration errors.
pub(crate) fn config_hint(err: &ConfigError) -> Option<String> {
    match err {
        ConfigError::NotFound { .. } => Some(format!(
            "create a {CONFIG_FILE_NAME} or pass --config <FILE>"
        )),
        ConfigError::UnknownStage { known, .. } => Some(format!("known stages: {known}")),
        ConfigError::NoMatchingRule { .. } => {
            Some("add a rule for this file type or list its extension in pass_through_extensions".to_string())
        }
        _ => None,
    }
}
