//! Shared configuration library for Engram.
//!
//! This crate centralizes settings loading and validation so the daemon and
//! the core pipeline agree on defaults and precedence. Settings come from a
//! TOML file under the project root, overlaid by environment variables and
//! finally by CLI flags (applied by the caller). All filesystem locations
//! derive from the single `ENGRAM_ROOT` environment variable.

pub mod paths;
pub mod settings;

pub use paths::{EngramPaths, ROOT_ENV};
pub use settings::{
    BackupSettings, ConsolidatorSettings, DatabaseSettings, RunnerSettings, Settings,
    SettingsError, TransitionSettings,
};
