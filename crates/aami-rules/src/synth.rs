//! Rule synthesis: stored definitions and group activations to rule documents.
//!
//! A group's effective activations are its own plus those inherited through
//! its dependency edges. When several groups in the chain activate the same
//! definition, nearer groups' overrides are merged over farther ones, and the
//! nearest `enabled` flag wins.
//!
//! Rules are emitted in ascending definition id order, so synthesizing
//! unchanged input twice produces byte-identical documents.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use aami_core::{
    AlertActivation, AlertDefinitionRepository, DefinitionId, Group, GroupId, GroupRepository,
    StoreError,
};
use aami_graph::{GraphError, RelationshipGraph};
use tracing::{debug, info, warn};

use crate::document::{Rule, RuleDocument, alert_name, rule_group_name};
use crate::error::{GroupFailure, Result, RuleError, RuleFailure};
use crate::render::{build_context, merge_params, render};

/// The result of synthesizing one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    /// The synthesized group.
    pub group_id: GroupId,
    /// The rendered document. Empty only when the group has no enabled
    /// activations.
    pub document: RuleDocument,
    /// Definitions that failed to render, alongside the ones that succeeded.
    pub failures: Vec<RuleFailure>,
}

impl Synthesis {
    /// Returns true if the group has nothing to alert on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }
}

/// The result of synthesizing every group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSynthesis {
    /// Groups that synthesized successfully.
    pub syntheses: BTreeMap<GroupId, Synthesis>,
    /// Groups that failed.
    pub failures: Vec<GroupFailure>,
}

impl BulkSynthesis {
    /// Returns true if no group failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts to the documents by group, or `BulkGeneration` if any group
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::BulkGeneration` naming every failed group.
    pub fn into_result(self) -> Result<BTreeMap<GroupId, RuleDocument>> {
        if !self.failures.is_empty() {
            return Err(RuleError::BulkGeneration {
                failures: self.failures,
                reload_error: None,
            });
        }
        Ok(self
            .syntheses
            .into_iter()
            .map(|(id, s)| (id, s.document))
            .collect())
    }
}

/// Builds rule documents from stored definitions and groups.
pub struct RuleSynthesizer<S> {
    store: Arc<S>,
    graph: Arc<RelationshipGraph>,
}

impl<S> RuleSynthesizer<S>
where
    S: AlertDefinitionRepository + GroupRepository,
{
    /// Creates a synthesizer over a store and the live graph.
    pub const fn new(store: Arc<S>, graph: Arc<RelationshipGraph>) -> Self {
        Self { store, graph }
    }

    /// Returns the enabled activations of a group after inheritance, ordered
    /// by definition id.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::GroupNotFound` if the group or one of its
    /// dependencies is missing.
    pub fn effective_activations(&self, group_id: &GroupId) -> Result<Vec<AlertActivation>> {
        let group = self.load_group(group_id)?;
        self.effective_for(&group)
    }

    /// Synthesizes the rule document for one group.
    ///
    /// Definitions that fail to render are reported in
    /// [`Synthesis::failures`] while the others are kept.
    ///
    /// # Errors
    ///
    /// - `RuleError::GroupNotFound` if the group is unknown
    /// - `RuleError::NoValidRules` if the group has enabled activations but
    ///   none of them produced a rule
    pub fn synthesize(&self, group_id: &GroupId) -> Result<Synthesis> {
        let group = self.load_group(group_id)?;
        let activations = self.effective_for(&group)?;

        let mut rules = Vec::with_capacity(activations.len());
        let mut failures = Vec::new();
        for activation in &activations {
            match self.build_rule(&group, activation) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!(
                        group_id = %group.id,
                        definition_id = %activation.definition_id,
                        error = %e,
                        "failed to build rule"
                    );
                    failures.push(RuleFailure {
                        definition_id: activation.definition_id.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if rules.is_empty() && !activations.is_empty() {
            return Err(RuleError::NoValidRules {
                group_id: group.id,
                failures,
            });
        }

        debug!(
            group_id = %group.id,
            rule_count = rules.len(),
            failed = failures.len(),
            "group synthesized"
        );
        Ok(Synthesis {
            document: RuleDocument::single(rule_group_name(&group.name, &group.id), rules),
            group_id: group.id,
            failures,
        })
    }

    /// Synthesizes every stored group.
    ///
    /// A failing group never discards the documents of the others; nothing is
    /// written here.
    ///
    /// # Errors
    ///
    /// Returns a storage error only if the group list cannot be read.
    pub fn synthesize_all(&self) -> Result<BulkSynthesis> {
        let groups = self.store.list_groups()?;
        let mut bulk = BulkSynthesis::default();

        for group in groups {
            match self.synthesize(&group.id) {
                Ok(synthesis) => {
                    bulk.syntheses.insert(group.id, synthesis);
                }
                Err(e) => {
                    warn!(group_id = %group.id, error = %e, "group synthesis failed");
                    bulk.failures.push(GroupFailure::from_error(group.id, &e));
                }
            }
        }

        info!(
            succeeded = bulk.syntheses.len(),
            failed = bulk.failures.len(),
            "synthesized all groups"
        );
        Ok(bulk)
    }

    fn load_group(&self, group_id: &GroupId) -> Result<Group> {
        self.store.get_group(group_id).map_err(|e| match e {
            StoreError::NotFound { .. } => RuleError::GroupNotFound {
                group_id: group_id.clone(),
            },
            other => RuleError::Storage(other),
        })
    }

    fn effective_for(&self, group: &Group) -> Result<Vec<AlertActivation>> {
        let ancestors = self.graph.ancestors(&group.id).map_err(|e| match e {
            GraphError::GroupNotFound { group } => RuleError::GroupNotFound { group_id: group },
            other => RuleError::Graph(other),
        })?;

        // Farthest first, so nearer groups overlay farther ones.
        let mut chain = Vec::with_capacity(ancestors.len() + 1);
        for ancestor in ancestors.iter().rev() {
            chain.push(self.load_group(ancestor)?);
        }

        let mut merged: BTreeMap<DefinitionId, AlertActivation> = BTreeMap::new();
        for source in chain.iter().chain(std::iter::once(group)) {
            for activation in &source.activations {
                match merged.entry(activation.definition_id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(activation.clone());
                    }
                    Entry::Occupied(mut slot) => overlay(slot.get_mut(), activation),
                }
            }
        }

        Ok(merged.into_values().filter(|a| a.enabled).collect())
    }

    fn build_rule(&self, group: &Group, activation: &AlertActivation) -> Result<Rule> {
        let definition = self.store.get_definition(&activation.definition_id)?;

        let params = merge_params(&definition.default_params, &activation.overrides);
        let for_duration = activation
            .for_duration
            .clone()
            .or_else(|| definition.for_duration.clone());
        let mut custom_labels = definition.labels.clone();
        custom_labels.extend(activation.labels.clone());
        let mut custom_annotations = definition.annotations.clone();
        custom_annotations.extend(activation.annotations.clone());

        let context = build_context(
            params,
            for_duration.as_deref(),
            &custom_labels,
            &custom_annotations,
        );
        let expr = render(&definition.query_template, &context).map_err(|source| {
            RuleError::QueryRendering {
                definition_id: definition.id.clone(),
                source,
            }
        })?;

        let mut labels = BTreeMap::from([
            ("severity".to_string(), definition.severity.as_str().to_string()),
            ("group_id".to_string(), group.id.to_string()),
        ]);
        labels.extend(custom_labels);

        let mut annotations = BTreeMap::from([
            ("summary".to_string(), definition.name.clone()),
            ("description".to_string(), definition.description.clone()),
        ]);
        annotations.extend(custom_annotations);

        Ok(Rule {
            alert: alert_name(&definition.name, &group.id),
            expr,
            for_duration,
            labels,
            annotations,
        })
    }
}

fn overlay(base: &mut AlertActivation, nearer: &AlertActivation) {
    base.overrides = merge_params(&base.overrides, &nearer.overrides);
    base.labels.extend(nearer.labels.clone());
    base.annotations.extend(nearer.annotations.clone());
    if nearer.for_duration.is_some() {
        base.for_duration.clone_from(&nearer.for_duration);
    }
    base.enabled = nearer.enabled;
}
