//! The closed error taxonomy shared by every AAMI crate.
//!
//! Crate-level errors keep their own structured variants; each one reports a
//! single [`ErrorKind`] so callers can branch on the category without caring
//! which component produced it.

use serde::{Deserialize, Serialize};

/// Category of a failure anywhere in the rule lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A referenced resource does not exist.
    NotFound,
    /// A resource with the same identity already exists.
    AlreadyExists,
    /// The resource is still referenced and cannot be removed.
    InUse,
    /// Input failed validation.
    InvalidInput,

    /// A dependency edge would close a cycle.
    CircularReference,
    /// A referenced resource is unknown to the graph.
    ForeignKeyViolation,
    /// The mutation would leave a target without any group.
    CannotRemoveLastGroup,

    /// The bootstrap token is past its expiry time.
    TokenExpired,
    /// The bootstrap token has reached its usage limit.
    TokenExhausted,
    /// The bootstrap token is unknown or revoked.
    InvalidToken,

    /// The rule document could not be serialized.
    RuleMarshalingFailed,
    /// The rule file could not be written (or was rolled back).
    RuleWriteFailed,
    /// The rule file could not be deleted.
    RuleDeleteFailed,
    /// A query template could not be rendered.
    QueryRenderingFailed,
    /// No rule of a group rendered successfully.
    NoValidRules,
    /// Validation or backend reload failed.
    RuleGenerationFailed,
    /// At least one group failed during a bulk pass.
    BulkGenerationFailed,

    /// The storage collaborator failed.
    Storage,
}

impl ErrorKind {
    /// Returns the kind as a stable snake_case string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InUse => "in_use",
            Self::InvalidInput => "invalid_input",
            Self::CircularReference => "circular_reference",
            Self::ForeignKeyViolation => "foreign_key_violation",
            Self::CannotRemoveLastGroup => "cannot_remove_last_group",
            Self::TokenExpired => "token_expired",
            Self::TokenExhausted => "token_exhausted",
            Self::InvalidToken => "invalid_token",
            Self::RuleMarshalingFailed => "rule_marshaling_failed",
            Self::RuleWriteFailed => "rule_write_failed",
            Self::RuleDeleteFailed => "rule_delete_failed",
            Self::QueryRenderingFailed => "query_rendering_failed",
            Self::NoValidRules => "no_valid_rules",
            Self::RuleGenerationFailed => "rule_generation_failed",
            Self::BulkGenerationFailed => "bulk_generation_failed",
            Self::Storage => "storage",
        }
    }

    /// Returns true for failures caused by relationship integrity rules.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::CircularReference | Self::ForeignKeyViolation | Self::CannotRemoveLastGroup
        )
    }

    /// Returns true for bootstrap token rejections.
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::TokenExhausted | Self::InvalidToken
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::CannotRemoveLastGroup.to_string(), "cannot_remove_last_group");
        assert_eq!(ErrorKind::TokenExhausted.to_string(), "token_exhausted");
    }

    #[test]
    fn kind_serde_matches_display() {
        let json = serde_json::to_string(&ErrorKind::BulkGenerationFailed).unwrap();
        assert_eq!(json, "\"bulk_generation_failed\"");
    }

    #[test]
    fn kind_categories() {
        assert!(ErrorKind::CircularReference.is_integrity());
        assert!(!ErrorKind::NotFound.is_integrity());
        assert!(ErrorKind::InvalidToken.is_token());
        assert!(!ErrorKind::RuleWriteFailed.is_token());
    }
}
