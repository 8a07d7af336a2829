//! selfpatch CLI - operator interface to the self-update engine.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use selfpatch::logging::{init_logging, LogConfig};

use commands::common::LockKindArg;

#[derive(Parser)]
#[command(name = "selfpatch")]
#[command(version, about = "Incremental self-updater for installed applications", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Installation directory (default: current directory)
    #[arg(long, global = true)]
    install_dir: Option<PathBuf>,

    /// Directory holding locks, work files and payloads
    /// (default: local data directory)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every payload listed in a catalog
    Download {
        /// Catalog file path or http(s) URL
        #[arg(long)]
        catalog: String,
    },

    /// Apply the catalog's patches to the installation
    Update {
        /// Catalog file path or http(s) URL
        #[arg(long)]
        catalog: String,

        /// Command to start once the installation is up to date
        #[arg(last = true)]
        relaunch: Vec<String>,
    },

    /// Acquire a typed lock and hold it
    Lock {
        #[arg(value_enum)]
        kind: LockKindArg,

        /// How long to hold the lock once acquired
        #[arg(long, default_value = "0")]
        hold_ms: u64,
    },

    /// Show or record the installed version
    Version {
        /// Record this version instead of printing it
        #[arg(long)]
        set: Option<String>,
    },

    /// Build a patch payload from two release directories
    MakePatch {
        /// Directory of the release being patched
        old: PathBuf,
        /// Directory of the release to produce
        new: PathBuf,
        /// Output payload file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&LogConfig::stderr(cli.verbose));

    let install_dir = cli.install_dir.unwrap_or_else(|| PathBuf::from("."));
    let config = commands::common::updater_config(install_dir, cli.state_dir.as_deref());

    let result = match cli.command {
        Commands::Download { catalog } => commands::download::run(config, &catalog),
        Commands::Update { catalog, relaunch } => {
            commands::update::run(config, &catalog, relaunch)
        }
        Commands::Lock { kind, hold_ms } => commands::lock::run(&config, kind, hold_ms),
        Commands::Version { set } => commands::version::run(&config.install_dir, set.as_deref()),
        Commands::MakePatch { old, new, output } => commands::make_patch::run(&old, &new, &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
