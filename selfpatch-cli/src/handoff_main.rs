//! selfpatch-handoff - finishes pending replacements after the application
//! exits, then relaunches it.
//!
//! Usage: `selfpatch-handoff <lock_dir> <pending_file> [relaunch...]`

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use console::{style, Term};
use dialoguer::Select;
use selfpatch::handoff::{
    DeadlineChoice, DeadlineHandler, FixedChoice, Handoff, HandoffConfig, HandoffOutcome,
    HandoffRequest, HANDOFF_CONFIG_FILE,
};
use selfpatch::logging::{init_logging, LogConfig};
use selfpatch::patch::PendingTriple;
use tracing::{error, info};

/// Log file written next to the locks.
const LOG_FILE: &str = "handoff.log";

#[derive(Parser)]
#[command(name = "selfpatch-handoff")]
#[command(version, about = "Finish pending replacements and relaunch", long_about = None)]
struct Args {
    /// Lock directory shared with the application
    lock_dir: PathBuf,

    /// Pending-replacement file written by the updater
    pending_file: PathBuf,

    /// Command to start afterwards
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    relaunch: Vec<String>,
}

/// Puts the deadline question to the operator on the terminal.
struct PromptHandler {
    term: Term,
}

impl DeadlineHandler for PromptHandler {
    fn on_deadline(&self, triple: &PendingTriple, error: &io::Error) -> DeadlineChoice {
        let _ = self.term.write_line(&format!(
            "{} cannot replace {}: {}",
            style("Update stalled:").yellow().bold(),
            triple.destination.display(),
            error
        ));

        let items = ["Start the previous version", "Exit without starting"];
        match Select::new()
            .with_prompt("The file is still in use. How do you want to continue?")
            .items(&items)
            .default(0)
            .interact_on_opt(&self.term)
        {
            Ok(Some(1)) => DeadlineChoice::Abort,
            Ok(_) => DeadlineChoice::RelaunchOriginal,
            Err(e) => {
                tracing::warn!(error = %e, "Prompt failed, relaunching");
                DeadlineChoice::RelaunchOriginal
            }
        }
    }
}

fn main() -> ExitCode {
    let started = Instant::now();
    let args = Args::parse();
    let _log_guard = init_logging(&LogConfig::stderr(0).with_file(args.lock_dir.join(LOG_FILE)));

    let config = match HandoffConfig::load(&args.lock_dir.join(HANDOFF_CONFIG_FILE)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid handoff configuration");
            return ExitCode::from(2);
        }
    };

    let request =
        HandoffRequest::new(&args.lock_dir, &args.pending_file, args.relaunch).with_started(started);
    let term = Term::stderr();
    let result = if term.is_term() {
        Handoff::new(config).run(&request, &PromptHandler { term })
    } else {
        Handoff::new(config).run(&request, &FixedChoice(DeadlineChoice::RelaunchOriginal))
    };

    match result {
        Ok(HandoffOutcome::Completed { relaunched }) => {
            info!(relaunched, "Handoff complete");
            ExitCode::SUCCESS
        }
        Ok(HandoffOutcome::Abandoned { relaunched }) => {
            info!(relaunched, "Handoff abandoned; pending file kept");
            ExitCode::from(1)
        }
        Ok(HandoffOutcome::Aborted) => {
            info!("Handoff aborted by operator");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "Handoff failed");
            ExitCode::from(1)
        }
    }
}
