//! The rule pipeline: synthesize, persist, reload.

use std::path::PathBuf;
use std::sync::Arc;

use aami_core::{AlertDefinitionRepository, GroupId, GroupRepository};
use aami_graph::RelationshipGraph;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RulesConfig;
use crate::error::{GroupFailure, Result, RuleError, RuleFailure};
use crate::reload::{ReloadCoordinator, ReloadOutcome};
use crate::synth::{RuleSynthesizer, Synthesis};
use crate::writer::{PromtoolValidator, RuleFileWriter, RuleValidator};

/// What happened to a group's rule file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GroupAction {
    /// The file was (re)written.
    Written {
        /// Rules in the file.
        rule_count: usize,
        /// The live file.
        path: PathBuf,
    },
    /// The group has no enabled activations and its file was removed.
    Deleted,
    /// The group has no enabled activations and had no file.
    Unchanged,
}

impl GroupAction {
    const fn changed_disk(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Per-group result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// The group.
    pub group_id: GroupId,
    /// What was done on disk.
    #[serde(flatten)]
    pub action: GroupAction,
    /// Definitions skipped because they failed to render.
    pub failures: Vec<RuleFailure>,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    /// One entry per group touched, ordered by group id.
    pub groups: Vec<GroupReport>,
    /// Outcome of the backend reload. `None` when nothing changed on disk.
    pub reload: Option<ReloadOutcome>,
}

/// Ties the synthesizer, writer and reload coordinator together.
pub struct RuleEngine<S, V = PromtoolValidator> {
    synthesizer: RuleSynthesizer<S>,
    writer: RuleFileWriter<V>,
    reloader: ReloadCoordinator,
}

impl<S> RuleEngine<S, PromtoolValidator>
where
    S: AlertDefinitionRepository + GroupRepository,
{
    /// Builds an engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Config` if the configuration is invalid.
    pub fn from_config(
        config: &RulesConfig,
        store: Arc<S>,
        graph: Arc<RelationshipGraph>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            synthesizer: RuleSynthesizer::new(store, graph),
            writer: RuleFileWriter::from_config(config),
            reloader: ReloadCoordinator::from_config(&config.reload)?,
        })
    }
}

impl<S, V> RuleEngine<S, V>
where
    S: AlertDefinitionRepository + GroupRepository,
    V: RuleValidator,
{
    /// Assembles an engine from its parts.
    pub const fn new(
        synthesizer: RuleSynthesizer<S>,
        writer: RuleFileWriter<V>,
        reloader: ReloadCoordinator,
    ) -> Self {
        Self {
            synthesizer,
            writer,
            reloader,
        }
    }

    /// Returns the synthesizer.
    pub const fn synthesizer(&self) -> &RuleSynthesizer<S> {
        &self.synthesizer
    }

    /// Returns the file writer.
    pub const fn writer(&self) -> &RuleFileWriter<V> {
        &self.writer
    }

    /// Returns the reload coordinator.
    pub const fn reloader(&self) -> &ReloadCoordinator {
        &self.reloader
    }

    /// Regenerates one group's rule file and reloads the backend.
    ///
    /// # Errors
    ///
    /// - synthesis errors (`GroupNotFound`, `NoValidRules`, storage)
    /// - writer errors; nothing is reloaded
    /// - `RuleError::Reload` if the file changed but the backend was not
    ///   notified
    pub async fn regenerate_group(&self, group_id: &GroupId) -> Result<EngineReport> {
        let synthesis = self.synthesizer.synthesize(group_id)?;
        let report = self.apply(synthesis).await?;
        let reload = self.reload_if(report.action.changed_disk()).await?;
        Ok(EngineReport {
            groups: vec![report],
            reload,
        })
    }

    /// Regenerates every group and reloads the backend once.
    ///
    /// Groups that synthesize are written even when others fail. Writes for
    /// different groups run concurrently.
    ///
    /// # Errors
    ///
    /// - `RuleError::BulkGeneration` naming every failed group, with the
    ///   reload failure attached if the final reload also failed
    /// - `RuleError::Reload` if every group succeeded but the reload failed
    pub async fn regenerate_all(&self) -> Result<EngineReport> {
        let bulk = self.synthesizer.synthesize_all()?;
        let mut failures = bulk.failures;

        let results = join_all(bulk.syntheses.into_values().map(|synthesis| async move {
            let group_id = synthesis.group_id.clone();
            (group_id, self.apply(synthesis).await)
        }))
        .await;

        let mut groups = Vec::with_capacity(results.len());
        for (group_id, result) in results {
            match result {
                Ok(report) => groups.push(report),
                Err(e) => {
                    warn!(group_id = %group_id, error = %e, "failed to persist group rules");
                    failures.push(GroupFailure::from_error(group_id, &e));
                }
            }
        }

        let changed = groups.iter().any(|g| g.action.changed_disk());
        let reload = self.reload_if(changed).await;

        info!(
            written = groups.len(),
            failed = failures.len(),
            reloaded = matches!(reload, Ok(Some(ReloadOutcome::Reloaded))),
            "regenerated all groups"
        );

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.group_id.cmp(&b.group_id));
            return Err(RuleError::BulkGeneration {
                failures,
                reload_error: reload.err().map(|e| e.to_string()),
            });
        }
        Ok(EngineReport {
            groups,
            reload: reload?,
        })
    }

    /// Deletes a group's rule file and reloads the backend.
    ///
    /// # Errors
    ///
    /// - `RuleError::Delete` if the file cannot be removed
    /// - `RuleError::Reload` if the backend was not notified
    pub async fn remove_group_rules(&self, group_id: &GroupId) -> Result<EngineReport> {
        let action = if self.writer.delete_rules(group_id).await? {
            self.reloader.mark_pending();
            GroupAction::Deleted
        } else {
            GroupAction::Unchanged
        };
        let reload = self.reload_if(action.changed_disk()).await?;
        Ok(EngineReport {
            groups: vec![GroupReport {
                group_id: group_id.clone(),
                action,
                failures: Vec::new(),
            }],
            reload,
        })
    }

    /// Writes or deletes one group's file. Returns with the group lock
    /// released.
    async fn apply(&self, synthesis: Synthesis) -> Result<GroupReport> {
        let Synthesis {
            group_id,
            document,
            failures,
        } = synthesis;

        let action = if document.is_empty() {
            if self.writer.delete_rules(&group_id).await? {
                GroupAction::Deleted
            } else {
                GroupAction::Unchanged
            }
        } else {
            let written = self.writer.write_rules(&group_id, &document).await?;
            GroupAction::Written {
                rule_count: document.rule_count(),
                path: written.path,
            }
        };

        if action.changed_disk() {
            self.reloader.mark_pending();
        }
        Ok(GroupReport {
            group_id,
            action,
            failures,
        })
    }

    async fn reload_if(&self, changed: bool) -> Result<Option<ReloadOutcome>> {
        if !changed {
            return Ok(None);
        }
        self.reloader.reload().await.map(Some)
    }
}
