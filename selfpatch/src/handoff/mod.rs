//! The self-update handoff.
//!
//! A running application cannot replace the files it holds open. After a
//! patch run leaves pending replacements, the application writes them to a
//! pending-replacement file, starts the handoff process and exits. The
//! handoff waits for the files to be released, performs the renames and
//! relaunches the application.
//!
//! Every rename is retried at a fixed interval until a deadline counted
//! from process start. A rename still failing at the deadline is put to a
//! [`DeadlineHandler`].

mod config;
mod error;
mod runner;

pub use config::{
    HandoffConfig, DEFAULT_MAX_EXECUTION_TIME, DEFAULT_RETRY_INTERVAL, HANDOFF_CONFIG_FILE,
};
pub use error::{HandoffError, HandoffResult};
pub use runner::{
    DeadlineChoice, DeadlineHandler, FixedChoice, Handoff, HandoffOutcome, HandoffRequest,
};
