//! Alert rule synthesis, validated persistence and backend reload.
//!
//! The pipeline for one group:
//!
//! 1. [`RuleSynthesizer`] resolves the group's effective activations
//!    (inherited through dependency edges), merges parameters and renders
//!    each definition's query template into a [`RuleDocument`].
//! 2. [`RuleFileWriter`] validates the document with an external checker,
//!    backs up the previous file, and writes the new one atomically,
//!    restoring the previous content if anything fails after the backup.
//! 3. [`ReloadCoordinator`] asks the backend to re-read its rules. A failed
//!    reload leaves the written files in place.
//!
//! [`RuleEngine`] runs the three steps for one group or for all of them.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use aami_rules::render::render;
//!
//! let mut params = BTreeMap::new();
//! params.insert("window".to_string(), serde_json::json!("5m"));
//! params.insert("threshold".to_string(), serde_json::json!(0.1));
//!
//! let expr = render("rate(errors[{{window}}]) > {{ .threshold }}", &params).unwrap();
//! assert_eq!(expr, "rate(errors[5m]) > 0.1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod reload;
pub mod render;
pub mod synth;
pub mod writer;

pub use config::{BackupConfig, ReloadConfig, RulesConfig, ValidationConfig};
pub use document::{Rule, RuleDocument, RuleGroup};
pub use engine::{EngineReport, GroupAction, GroupReport, RuleEngine};
pub use error::{GroupFailure, Result, RuleError, RuleFailure, WriteStage};
pub use reload::{ReloadCoordinator, ReloadOutcome, ReloadState};
pub use render::RenderError;
pub use synth::{BulkSynthesis, RuleSynthesizer, Synthesis};
pub use writer::{PromtoolValidator, RuleFileWriter, RuleValidator, WriteReport};
