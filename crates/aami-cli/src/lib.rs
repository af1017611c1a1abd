//! # aami-cli
//!
//! Operator command-line interface for the AAMI rule lifecycle.
//!
//! Provides commands for:
//! - Regenerating rule files for one group or all groups
//! - Deleting and restoring a group's rule file
//! - Reloading and health-checking the metrics backend
//! - Issuing, listing and revoking bootstrap tokens
//!
//! State (definitions, groups, targets, tokens) is read from a JSON file
//! and written back after token changes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod state;

pub use cli::{Cli, Commands, Format, TokenCommands};
pub use commands::{Session, resolve_config};
pub use error::CliError;
pub use output::OutputFormat;
