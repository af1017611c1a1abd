//! Identifier newtypes.
//!
//! Group identifiers end up in rule file names, so every identifier is
//! restricted to a filesystem-safe alphabet.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum identifier length.
pub const MAX_ID_LENGTH: usize = 128;

static ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap_or_else(|_| unreachable!())
});

/// An identifier failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {entity} id '{value}': {reason}")]
pub struct IdError {
    /// Which kind of identifier was being parsed.
    pub entity: &'static str,
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

fn check_id(entity: &'static str, value: &str) -> Result<(), IdError> {
    let reason = if value.is_empty() {
        "id cannot be empty"
    } else if value.len() > MAX_ID_LENGTH {
        "id is too long"
    } else if !ID_REGEX.is_match(value) {
        "id must be alphanumeric with '-', '_' or '.'"
    } else {
        return Ok(());
    };
    Err(IdError {
        entity,
        value: value.to_string(),
        reason,
    })
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Creates an identifier from an existing string.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is empty, too long, or contains
            /// characters outside `[A-Za-z0-9_.-]`.
            pub fn from_string(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();
                check_id($entity, &id)?;
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_string(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_string(s)
            }
        }
    };
}

define_id!(
    /// Identifier of a monitored group.
    GroupId,
    "group"
);
define_id!(
    /// Identifier of a monitored target.
    TargetId,
    "target"
);
define_id!(
    /// Identifier of an alert definition.
    DefinitionId,
    "definition"
);
define_id!(
    /// Identifier of a bootstrap token record (never the secret itself).
    TokenId,
    "token"
);
