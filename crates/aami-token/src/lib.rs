//! Bootstrap token lifecycle for AAMI agent registration.
//!
//! A bootstrap token is a random secret handed to an operator once. Remote
//! agents present it to register themselves; each registration consumes one
//! use. Tokens become permanently unusable once they expire, run out of uses,
//! or are revoked.
//!
//! - [`TokenManager`]: issue, validate, consume, revoke and inspect tokens
//! - [`TokenSecret`]: the plaintext value, zeroized on drop
//! - [`AgentRegistrar`]: consumes a token and places the new target in a group
//!
//! Only the blake3 hash of a secret is ever stored.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use aami_core::InMemoryStore;
//! use aami_token::{TokenManager, TokenRequest};
//!
//! let manager = TokenManager::new(Arc::new(InMemoryStore::new()));
//! let issued = manager
//!     .issue(TokenRequest::new("rack-a").with_usage_limit(2))
//!     .unwrap();
//!
//! manager.consume(issued.secret.as_str()).unwrap();
//! manager.consume(issued.secret.as_str()).unwrap();
//! assert!(manager.consume(issued.secret.as_str()).is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod manager;
pub mod registration;
pub mod secret;

pub use error::{Result, TokenError};
pub use manager::{
    DEFAULT_TTL_DAYS, DEFAULT_USAGE_LIMIT, IssuedToken, TokenManager, TokenRequest,
};
pub use registration::{AgentRegistrar, Registration, RegistrationRequest};
pub use secret::{TokenSecret, hash_secret};
