//! Shared building blocks for the AAMI alert rule lifecycle.
//!
//! `aami-core` holds everything the engine crates agree on:
//!
//! - **Identifiers**: [`GroupId`], [`TargetId`], [`DefinitionId`], [`TokenId`]
//! - **Entity records**: [`AlertDefinition`], [`Group`], [`Target`], [`BootstrapToken`]
//! - **Error taxonomy**: the closed [`ErrorKind`] every crate error maps onto
//! - **Storage collaborator**: repository traits plus an [`InMemoryStore`]
//!
//! # Example
//!
//! ```rust
//! use aami_core::{AlertDefinition, DefinitionId, Severity};
//!
//! let def = AlertDefinition::new(
//!     DefinitionId::from_string("high-error-rate").unwrap(),
//!     "HighErrorRate",
//!     "rate(errors[{{window}}]) > {{threshold}}",
//! )
//! .with_severity(Severity::Critical)
//! .with_param("window", "5m")
//! .with_param("threshold", 0.1);
//!
//! assert_eq!(def.severity, Severity::Critical);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod ids;
pub mod store;
pub mod types;

pub use error::ErrorKind;
pub use ids::{DefinitionId, GroupId, IdError, TargetId, TokenId};
pub use store::{
    AlertDefinitionRepository, BootstrapTokenRepository, ConsumeOutcome, GroupRepository,
    InMemoryStore, StoreError, StoreSnapshot, TargetRepository,
};
pub use types::{
    AlertActivation, AlertDefinition, BootstrapToken, Group, ParamMap, Severity, Target,
    TokenState,
};
