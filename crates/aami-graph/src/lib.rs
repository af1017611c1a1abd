//! Relationship graph between monitored groups and targets.
//!
//! `aami-graph` owns two kinds of edges:
//!
//! - **Membership**: group ↔ target. Every target belongs to at least one
//!   group at all times; a group may be empty.
//! - **Dependency**: group → group, used for rule inheritance. The dependency
//!   edges always form a DAG.
//!
//! All mutations run under one write lock, and integrity checks (cycle
//! detection, last-group) execute inside the same critical section as the
//! mutation they guard. Reads return snapshots.
//!
//! # Example
//!
//! ```rust
//! use aami_core::{GroupId, TargetId};
//! use aami_graph::RelationshipGraph;
//!
//! let graph = RelationshipGraph::new();
//! let web = GroupId::from_string("web").unwrap();
//! let base = GroupId::from_string("base").unwrap();
//! graph.add_group(web.clone()).unwrap();
//! graph.add_group(base.clone()).unwrap();
//!
//! graph.add_dependency(&web, &base).unwrap();
//! assert!(graph.add_dependency(&base, &web).is_err()); // would close a cycle
//!
//! let node = TargetId::from_string("node-1").unwrap();
//! graph.add_membership(&web, &node).unwrap();
//! assert!(graph.remove_membership(&web, &node).is_err()); // last group
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod graph;

pub use error::{GraphError, Result};
pub use graph::RelationshipGraph;
