//! Error types for the aami-graph crate.

use aami_core::{ErrorKind, GroupId, TargetId};
use thiserror::Error;

/// Errors that can occur while mutating or reading the relationship graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The group is not part of the graph.
    #[error("group not found: {group}")]
    GroupNotFound {
        /// The missing group.
        group: GroupId,
    },

    /// The target is not part of the graph.
    #[error("target not found: {target}")]
    TargetNotFound {
        /// The missing target.
        target: TargetId,
    },

    /// A mutation referenced a group the graph does not know.
    #[error("unknown group referenced: {group}")]
    UnknownGroup {
        /// The referenced group.
        group: GroupId,
    },

    /// The group is already registered.
    #[error("group already exists: {group}")]
    GroupExists {
        /// The duplicate group.
        group: GroupId,
    },

    /// The target is already a member of the group.
    #[error("target {target} is already a member of group {group}")]
    MembershipExists {
        /// The group.
        group: GroupId,
        /// The target.
        target: TargetId,
    },

    /// The target is not a member of the group.
    #[error("target {target} is not a member of group {group}")]
    MembershipNotFound {
        /// The group.
        group: GroupId,
        /// The target.
        target: TargetId,
    },

    /// The mutation would leave a target without groups.
    #[error("cannot remove last group {group} from target {target}")]
    CannotRemoveLastGroup {
        /// The group being removed.
        group: GroupId,
        /// The target that would be orphaned.
        target: TargetId,
    },

    /// The dependency edge would close a cycle.
    #[error("circular reference: {group} -> {depends_on} closes cycle {}", format_path(.cycle))]
    CircularReference {
        /// Source of the rejected edge.
        group: GroupId,
        /// Destination of the rejected edge.
        depends_on: GroupId,
        /// The cycle that would have been formed, starting and ending at `group`.
        cycle: Vec<GroupId>,
    },

    /// Other groups still depend on this group.
    #[error("group {group} is in use by dependents: {}", format_path(.dependents))]
    GroupInUse {
        /// The group being removed.
        group: GroupId,
        /// Groups that depend on it.
        dependents: Vec<GroupId>,
    },

    /// A target must be given at least one group.
    #[error("target {target} requires at least one group")]
    EmptyGroupSet {
        /// The target.
        target: TargetId,
    },
}

fn format_path(path: &[GroupId]) -> String {
    path.iter()
        .map(GroupId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl GraphError {
    /// Returns the error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::GroupNotFound { .. }
            | Self::TargetNotFound { .. }
            | Self::MembershipNotFound { .. } => ErrorKind::NotFound,
            Self::UnknownGroup { .. } => ErrorKind::ForeignKeyViolation,
            Self::GroupExists { .. } | Self::MembershipExists { .. } => ErrorKind::AlreadyExists,
            Self::CannotRemoveLastGroup { .. } => ErrorKind::CannotRemoveLastGroup,
            Self::CircularReference { .. } => ErrorKind::CircularReference,
            Self::GroupInUse { .. } => ErrorKind::InUse,
            Self::EmptyGroupSet { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn g(id: &str) -> GroupId {
        GroupId::from_string(id).unwrap()
    }

    #[test]
    fn error_display_circular_reference() {
        let err = GraphError::CircularReference {
            group: g("a"),
            depends_on: g("b"),
            cycle: vec![g("a"), g("b"), g("a")],
        };
        assert_eq!(
            err.to_string(),
            "circular reference: a -> b closes cycle a -> b -> a"
        );
        assert_eq!(err.kind(), ErrorKind::CircularReference);
    }

    #[test]
    fn error_display_last_group() {
        let err = GraphError::CannotRemoveLastGroup {
            group: g("web"),
            target: TargetId::from_string("node-1").unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "cannot remove last group web from target node-1"
        );
        assert_eq!(err.kind(), ErrorKind::CannotRemoveLastGroup);
    }

    #[test]
    fn unknown_group_is_foreign_key_violation() {
        let err = GraphError::UnknownGroup { group: g("x") };
        assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    }
}
