//! selfpatch - incremental self-update for installed applications.
//!
//! The crate coordinates independent processes through a shared lock
//! directory, downloads patch payloads with resume and checksum
//! verification, applies patch chains, and hands replacements of files the
//! running application holds open to a separate handoff process.
//!
//! - [`lock`]: cross-process INSTANCE / DOWNLOADER / UPDATER locks
//! - [`download`]: resumable, verified downloads
//! - [`patch`]: patch chain application and pending replacements
//! - [`handoff`]: the replacement loop of the handoff process
//! - [`update`]: download and update control flow

pub mod download;
pub mod fsutil;
pub mod handoff;
pub mod lock;
pub mod logging;
pub mod patch;
pub mod update;
pub mod version;
