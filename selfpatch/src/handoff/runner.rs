//! The replacement loop run by the handoff process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::config::HandoffConfig;
use super::error::{HandoffError, HandoffResult};
use crate::fsutil::{is_in_use, move_unless_in_use};
use crate::lock::LockCoordinator;
use crate::patch::{read_pending_file, PendingTriple};

/// What to do when a rename still fails at the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineChoice {
    /// Stop replacing and relaunch the application as it is.
    RelaunchOriginal,
    /// Stop without relaunching.
    Abort,
}

/// Asks the operator how to proceed after the deadline.
pub trait DeadlineHandler {
    fn on_deadline(&self, triple: &PendingTriple, error: &io::Error) -> DeadlineChoice;
}

/// Always answers with the same choice.
#[derive(Debug, Clone, Copy)]
pub struct FixedChoice(pub DeadlineChoice);

impl DeadlineHandler for FixedChoice {
    fn on_deadline(&self, _triple: &PendingTriple, _error: &io::Error) -> DeadlineChoice {
        self.0
    }
}

/// Arguments of one handoff invocation.
#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub lock_dir: PathBuf,
    pub pending_file: PathBuf,
    /// Program and arguments to start afterwards. Empty means no relaunch.
    pub relaunch: Vec<String>,
    /// Start of the process; the deadline counts from here.
    pub started: Instant,
}

impl HandoffRequest {
    pub fn new(
        lock_dir: impl Into<PathBuf>,
        pending_file: impl Into<PathBuf>,
        relaunch: Vec<String>,
    ) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            pending_file: pending_file.into(),
            relaunch,
            started: Instant::now(),
        }
    }

    pub fn with_started(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }
}

/// How a handoff ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Every replacement was made.
    Completed { relaunched: bool },
    /// The operator gave up on the remaining replacements.
    Abandoned { relaunched: bool },
    /// The operator aborted; nothing was relaunched.
    Aborted,
}

enum LoopOutcome {
    Completed,
    Abandoned,
    Aborted,
}

/// Finishes pending replacements on behalf of an exited application.
#[derive(Debug, Clone, Default)]
pub struct Handoff {
    config: HandoffConfig,
}

impl Handoff {
    pub fn new(config: HandoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Run the handoff.
    ///
    /// Holds the global lock of `request.lock_dir` for the whole replacement
    /// loop. The lock is released before the relaunch command is spawned.
    ///
    /// # Errors
    ///
    /// [`HandoffError::UpdateInProgress`] when another updater-class process
    /// owns the lock directory.
    pub fn run(
        &self,
        request: &HandoffRequest,
        handler: &dyn DeadlineHandler,
    ) -> HandoffResult<HandoffOutcome> {
        let deadline = request.started + self.config.max_execution_time;
        let retry = self.config.retry_interval;
        let coordinator = LockCoordinator::new(&request.lock_dir)?;

        let Some(mut global) = coordinator.acquire_global(remaining(deadline), retry)? else {
            return Err(HandoffError::UpdateInProgress(request.lock_dir.clone()));
        };
        if !coordinator.probe_updater_marker(remaining(deadline), retry)? {
            return Err(HandoffError::UpdateInProgress(request.lock_dir.clone()));
        }

        let triples = read_pending_file(&request.pending_file)?;
        info!(
            pending = %request.pending_file.display(),
            replacements = triples.len(),
            "Finishing pending replacements"
        );

        let outcome = self.replace_all(&triples, deadline, handler);
        if matches!(outcome, LoopOutcome::Completed) {
            if let Err(e) = fs::remove_file(&request.pending_file) {
                warn!(path = %request.pending_file.display(), error = %e, "Could not delete pending file");
            }
        }
        global.release();

        match outcome {
            LoopOutcome::Completed => Ok(HandoffOutcome::Completed {
                relaunched: relaunch(&request.relaunch)?,
            }),
            LoopOutcome::Abandoned => Ok(HandoffOutcome::Abandoned {
                relaunched: relaunch(&request.relaunch)?,
            }),
            LoopOutcome::Aborted => Ok(HandoffOutcome::Aborted),
        }
    }

    fn replace_all(
        &self,
        triples: &[PendingTriple],
        deadline: Instant,
        handler: &dyn DeadlineHandler,
    ) -> LoopOutcome {
        for triple in triples {
            if let Err(e) = self.replace_one(triple, deadline) {
                warn!(destination = %triple.destination.display(), error = %e, "Replacement failed at deadline");
                return match handler.on_deadline(triple, &e) {
                    DeadlineChoice::RelaunchOriginal => LoopOutcome::Abandoned,
                    DeadlineChoice::Abort => LoopOutcome::Aborted,
                };
            }
        }
        LoopOutcome::Completed
    }

    fn replace_one(&self, triple: &PendingTriple, deadline: Instant) -> io::Result<()> {
        let dest = triple.destination.as_path();

        if triple.is_directory() {
            return self.retry(deadline, || fs::create_dir_all(dest));
        }

        if let Some(backup) = &triple.backup {
            if dest.exists() && !backup.exists() {
                self.retry(deadline, || move_unless_in_use(dest, backup))?;
                debug!(destination = %dest.display(), backup = %backup.display(), "Moved aside");
            }
        }

        if let Some(staged) = &triple.staged {
            if dest.exists() && triple.backup.is_none() {
                self.retry(deadline, || remove_unless_in_use(dest))?;
            }
            if !dest.exists() {
                self.retry(deadline, || move_unless_in_use(staged, dest))?;
                debug!(destination = %dest.display(), "Replaced");
            }
        }
        Ok(())
    }

    /// Retry `action` every retry interval until it succeeds or the
    /// deadline passes.
    fn retry(&self, deadline: Instant, mut action: impl FnMut() -> io::Result<()>) -> io::Result<()> {
        loop {
            match action() {
                Ok(()) => return Ok(()),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(e) => {
                    debug!(error = %e, "Retrying");
                    thread::sleep(self.config.retry_interval.min(remaining(deadline)));
                }
            }
        }
    }
}

fn remove_unless_in_use(path: &Path) -> io::Result<()> {
    if is_in_use(path) {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("{} is in use", path.display()),
        ));
    }
    fs::remove_file(path)
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Spawn the relaunch command without waiting for it.
fn relaunch(command: &[String]) -> HandoffResult<bool> {
    let Some((program, args)) = command.split_first() else {
        return Ok(false);
    };
    info!(program = %program, "Relaunching application");
    Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| HandoffError::Relaunch {
            command: command.join(" "),
            source: e,
        })?;
    Ok(true)
}
