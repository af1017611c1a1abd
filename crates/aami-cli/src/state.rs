//! JSON state file holding the store contents between invocations.

use std::path::{Path, PathBuf};

use aami_core::{InMemoryStore, StoreSnapshot};
use tracing::debug;

use crate::error::CliError;

fn state_error(path: &Path, reason: impl std::fmt::Display) -> CliError {
    CliError::State {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Loads the store from `path`. A missing file yields an empty store.
///
/// # Errors
///
/// Returns `CliError::State` if the file cannot be read, is not valid JSON,
/// or contains duplicate records.
pub fn load(path: &Path) -> Result<InMemoryStore, CliError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(InMemoryStore::new());
        }
        Err(e) => return Err(state_error(path, e)),
    };

    let snapshot: StoreSnapshot =
        serde_json::from_str(&content).map_err(|e| state_error(path, format!("invalid JSON: {e}")))?;
    InMemoryStore::from_snapshot(snapshot).map_err(|e| state_error(path, e))
}

/// Writes the store to `path` through a temporary file and a rename.
///
/// # Errors
///
/// Returns `CliError::State` if the file cannot be written.
pub fn save(path: &Path, store: &InMemoryStore) -> Result<(), CliError> {
    let content = serde_json::to_vec_pretty(&store.snapshot())
        .map_err(|e| state_error(path, format!("failed to serialize: {e}")))?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    std::fs::write(&temp, content).map_err(|e| state_error(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| state_error(path, e))?;
    debug!(path = %path.display(), "state saved");
    Ok(())
}
