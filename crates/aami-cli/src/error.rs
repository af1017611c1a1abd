//! CLI error types.

use std::path::PathBuf;

use aami_core::{IdError, StoreError};
use aami_graph::GraphError;
use aami_rules::RuleError;
use aami_token::TokenError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The state file could not be read or written.
    #[error("state file {}: {reason}", .path.display())]
    State {
        /// The state file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// Rule pipeline failure.
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// Token failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Relationship graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IdError> for CliError {
    fn from(err: IdError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
