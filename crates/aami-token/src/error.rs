//! Error types for the aami-token crate.

use aami_core::{ErrorKind, StoreError, TokenId};
use aami_graph::GraphError;
use thiserror::Error;

/// Errors that can occur during token and registration operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is past its expiry time.
    #[error("token {token_id} expired")]
    Expired {
        /// The expired token.
        token_id: TokenId,
    },

    /// The token reached its usage limit.
    #[error("token {token_id} exhausted after {usage_limit} uses")]
    Exhausted {
        /// The exhausted token.
        token_id: TokenId,
        /// The configured limit.
        usage_limit: u32,
    },

    /// The token value is unknown or revoked.
    #[error("invalid token: {reason}")]
    Invalid {
        /// Why the token was rejected.
        reason: String,
    },

    /// A token request was malformed.
    #[error("invalid token request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// The relationship graph rejected the registration.
    #[error("registration rejected: {0}")]
    Graph(#[from] GraphError),

    /// The storage collaborator failed.
    #[error("token storage error: {0}")]
    Storage(#[from] StoreError),
}

impl TokenError {
    /// Returns the error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Expired { .. } => ErrorKind::TokenExpired,
            Self::Exhausted { .. } => ErrorKind::TokenExhausted,
            Self::Invalid { .. } => ErrorKind::InvalidToken,
            Self::InvalidRequest { .. } => ErrorKind::InvalidInput,
            Self::Graph(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Result type for token operations.
pub type Result<T> = std::result::Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;
    use aami_core::GroupId;

    #[test]
    fn token_errors_map_to_token_kinds() {
        let id = TokenId::from_string("t1").unwrap();
        assert_eq!(
            TokenError::Expired {
                token_id: id.clone()
            }
            .kind(),
            ErrorKind::TokenExpired
        );
        assert_eq!(
            TokenError::Exhausted {
                token_id: id,
                usage_limit: 3
            }
            .kind(),
            ErrorKind::TokenExhausted
        );
        assert_eq!(TokenError::invalid("unknown").kind(), ErrorKind::InvalidToken);
    }

    #[test]
    fn wrapped_errors_keep_their_kind() {
        let err = TokenError::from(GraphError::UnknownGroup {
            group: GroupId::from_string("g").unwrap(),
        });
        assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);

        let err = TokenError::from(StoreError::Backend("disk full".to_string()));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn exhausted_display() {
        let err = TokenError::Exhausted {
            token_id: TokenId::from_string("tok").unwrap(),
            usage_limit: 10,
        };
        assert_eq!(err.to_string(), "token tok exhausted after 10 uses");
    }
}
