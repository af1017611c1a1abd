//! Error types for the aami-rules crate.

use std::fmt;
use std::path::PathBuf;

use aami_core::{DefinitionId, ErrorKind, GroupId, StoreError};
use aami_graph::GraphError;
use serde::Serialize;
use thiserror::Error;

use crate::render::RenderError;

/// Stage of the write state machine at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStage {
    /// Converting the document to rule-file text.
    Serialize,
    /// Running the external validator.
    Validate,
    /// Copying the current file to the backup location.
    Backup,
    /// Writing the temporary file and renaming it into place.
    WriteAtomic,
    /// Verifying the file now on disk.
    Commit,
    /// Putting the previous content back.
    Restore,
}

impl WriteStage {
    /// Returns the stage as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Serialize => "serialize",
            Self::Validate => "validate",
            Self::Backup => "backup",
            Self::WriteAtomic => "write_atomic",
            Self::Commit => "commit",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One definition that could not be turned into a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    /// The definition that failed.
    pub definition_id: DefinitionId,
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

/// One group that failed during a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    /// The group that failed.
    pub group_id: GroupId,
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable cause.
    pub message: String,
}

impl GroupFailure {
    /// Builds a failure record from an error.
    #[must_use]
    pub fn from_error(group_id: GroupId, error: &RuleError) -> Self {
        Self {
            group_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Errors that can occur in the rule lifecycle.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The configuration is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// A query template could not be rendered.
    #[error("query rendering failed for definition {definition_id}: {source}")]
    QueryRendering {
        /// The definition whose template failed.
        definition_id: DefinitionId,
        /// The renderer error.
        #[source]
        source: RenderError,
    },

    /// No activated definition produced a rule.
    #[error("no valid rules for group {group_id} ({} failed)", .failures.len())]
    NoValidRules {
        /// The group.
        group_id: GroupId,
        /// Every definition that failed.
        failures: Vec<RuleFailure>,
    },

    /// The group does not exist.
    #[error("group not found: {group_id}")]
    GroupNotFound {
        /// The missing group.
        group_id: GroupId,
    },

    /// The document could not be serialized.
    #[error("failed to marshal rules for group {group_id}: {source}")]
    Marshal {
        /// The group.
        group_id: GroupId,
        /// The serializer error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The external validator rejected the rules.
    #[error("rule validation failed for group {group_id}: {output}")]
    Validation {
        /// The group.
        group_id: GroupId,
        /// Validator diagnostics.
        output: String,
    },

    /// A filesystem step of the write failed.
    #[error("rule write failed for group {group_id} at {stage} ({}): {source}", .path.display())]
    Write {
        /// The group.
        group_id: GroupId,
        /// Where in the write sequence it failed.
        stage: WriteStage,
        /// The path being operated on.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The rule file could not be deleted.
    #[error("rule delete failed for group {group_id} ({}): {source}", .path.display())]
    Delete {
        /// The group.
        group_id: GroupId,
        /// The file that could not be removed.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No backup exists to restore from.
    #[error("no backup found for group {group_id}")]
    NoBackup {
        /// The group.
        group_id: GroupId,
    },

    /// The rule directory could not be listed.
    #[error("failed to list rule files in {}: {source}", .path.display())]
    List {
        /// The directory.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backend did not acknowledge the reload. Rule files on disk are
    /// already updated.
    #[error("backend reload via {url} failed: {reason}")]
    Reload {
        /// The reload URL.
        url: String,
        /// Why the reload failed.
        reason: String,
    },

    /// At least one group failed in a bulk run.
    #[error("bulk generation failed for {} group(s): {}", .failures.len(), failed_ids(.failures))]
    BulkGeneration {
        /// Every failed group.
        failures: Vec<GroupFailure>,
        /// Set when the single reload at the end of the run also failed.
        reload_error: Option<String>,
    },

    /// The relationship graph rejected the lookup.
    #[error("relationship graph error: {0}")]
    Graph(#[from] GraphError),

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

fn failed_ids(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(|f| f.group_id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RuleError {
    /// Returns the error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::InvalidInput,
            Self::QueryRendering { .. } => ErrorKind::QueryRenderingFailed,
            Self::NoValidRules { .. } => ErrorKind::NoValidRules,
            Self::GroupNotFound { .. } | Self::NoBackup { .. } => ErrorKind::NotFound,
            Self::Marshal { .. } => ErrorKind::RuleMarshalingFailed,
            Self::Validation { .. } | Self::Reload { .. } => ErrorKind::RuleGenerationFailed,
            Self::Write { .. } => ErrorKind::RuleWriteFailed,
            Self::Delete { .. } => ErrorKind::RuleDeleteFailed,
            Self::List { .. } => ErrorKind::Storage,
            Self::BulkGeneration { .. } => ErrorKind::BulkGenerationFailed,
            Self::Graph(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }

    /// Returns true when the rules reached disk and only the backend
    /// notification failed.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Reload { .. })
    }

    /// Returns the write stage for write failures.
    #[must_use]
    pub const fn stage(&self) -> Option<WriteStage> {
        match self {
            Self::Marshal { .. } => Some(WriteStage::Serialize),
            Self::Validation { .. } => Some(WriteStage::Validate),
            Self::Write { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Result type for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn g(id: &str) -> GroupId {
        GroupId::from_string(id).unwrap()
    }

    #[test]
    fn reload_errors_are_persisted_write_errors_are_not() {
        let reload = RuleError::Reload {
            url: "http://localhost:9090/-/reload".to_string(),
            reason: "timed out".to_string(),
        };
        assert!(reload.is_persisted());
        assert_eq!(reload.kind(), ErrorKind::RuleGenerationFailed);

        let write = RuleError::Write {
            group_id: g("web"),
            stage: WriteStage::WriteAtomic,
            path: PathBuf::from("/tmp/group-web.yml"),
            source: std::io::Error::other("disk full"),
        };
        assert!(!write.is_persisted());
        assert_eq!(write.kind(), ErrorKind::RuleWriteFailed);
        assert_eq!(write.stage(), Some(WriteStage::WriteAtomic));
    }

    #[test]
    fn validation_failure_is_generation_failure() {
        let err = RuleError::Validation {
            group_id: g("web"),
            output: "bad expr".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RuleGenerationFailed);
        assert_eq!(err.stage(), Some(WriteStage::Validate));
        assert!(!err.is_persisted());
    }

    #[test]
    fn bulk_error_names_failed_groups() {
        let failures = vec![
            GroupFailure {
                group_id: g("a"),
                kind: ErrorKind::NoValidRules,
                message: "none".to_string(),
            },
            GroupFailure {
                group_id: g("b"),
                kind: ErrorKind::RuleWriteFailed,
                message: "io".to_string(),
            },
        ];
        let err = RuleError::BulkGeneration {
            failures,
            reload_error: None,
        };
        assert_eq!(
            err.to_string(),
            "bulk generation failed for 2 group(s): a, b"
        );
        assert_eq!(err.kind(), ErrorKind::BulkGenerationFailed);
    }

    #[test]
    fn stage_display() {
        assert_eq!(WriteStage::WriteAtomic.to_string(), "write_atomic");
        assert_eq!(WriteStage::Restore.to_string(), "restore");
    }
}
