//! CLI command implementations.

pub mod common;
pub mod download;
pub mod lock;
pub mod make_patch;
pub mod update;
pub mod version;
