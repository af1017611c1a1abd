//! Agent self-registration gated by bootstrap tokens.

use std::collections::BTreeMap;
use std::sync::Arc;

use aami_core::{
    BootstrapToken, BootstrapTokenRepository, Group, GroupId, GroupRepository, Target, TargetId,
    TargetRepository,
};
use aami_graph::{GraphError, RelationshipGraph};
use tracing::{error, info, warn};

use crate::error::{Result, TokenError};
use crate::manager::TokenManager;

/// What an agent submits to register itself.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    /// Plaintext bootstrap token.
    pub token: String,
    /// Hostname of the agent.
    pub hostname: String,
    /// IP address of the agent.
    pub ip_address: String,
    /// Group the new target joins. `None` creates a dedicated
    /// `target-<id>` group for it.
    pub group: Option<GroupId>,
    /// Labels supplied by the agent. Token labels are applied first.
    pub labels: BTreeMap<String, String>,
}

/// A completed registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The created target.
    pub target: Target,
    /// The group the target was placed in.
    pub group: GroupId,
    /// The token after its use was counted.
    pub token: BootstrapToken,
}

/// Registers agents: consumes one token use, then places the new target in
/// its first group.
///
/// If any step after the consume fails, the target and its membership are
/// removed again and the use is refunded.
pub struct AgentRegistrar<S> {
    tokens: TokenManager<S>,
    graph: Arc<RelationshipGraph>,
}

impl<S> AgentRegistrar<S>
where
    S: BootstrapTokenRepository + TargetRepository + GroupRepository,
{
    /// Creates a registrar over a store and the live graph.
    pub fn new(store: Arc<S>, graph: Arc<RelationshipGraph>) -> Self {
        Self {
            tokens: TokenManager::new(store),
            graph,
        }
    }

    /// Registers a new target.
    ///
    /// # Errors
    ///
    /// - token errors from [`TokenManager::consume`]
    /// - `GraphError::UnknownGroup` if the named group does not exist
    /// - storage errors while persisting the target
    pub fn register(&self, request: RegistrationRequest) -> Result<Registration> {
        if let Some(group) = request
            .group
            .as_ref()
            .filter(|group| !self.graph.contains_group(group))
        {
            return Err(GraphError::UnknownGroup {
                group: group.clone(),
            }
            .into());
        }

        let target_id = TargetId::new();
        let (group, own_group) = match request.group {
            Some(group) => (group, false),
            None => (own_group_id(&target_id)?, true),
        };

        let token = self.tokens.consume(&request.token)?;

        let mut labels = token.labels.clone();
        labels.extend(request.labels);
        let target = Target {
            id: target_id,
            hostname: request.hostname,
            ip_address: request.ip_address,
            labels,
        };

        if let Err(e) = self.place(&target, &group, own_group) {
            error!(
                target_id = %target.id,
                group_id = %group,
                error = %e,
                "registration failed, refunding token use"
            );
            if let Err(refund) = self.tokens.refund(&token.id) {
                warn!(token_id = %token.id, error = %refund, "failed to refund token use");
            }
            return Err(e);
        }

        info!(
            target_id = %target.id,
            hostname = %target.hostname,
            group_id = %group,
            own_group,
            token_id = %token.id,
            "agent registered"
        );
        Ok(Registration {
            target,
            group,
            token,
        })
    }

    /// Links the target into the graph and the store. Undoes the graph side
    /// when the store rejects it.
    fn place(&self, target: &Target, group: &GroupId, own_group: bool) -> Result<()> {
        if own_group {
            self.graph.add_group(group.clone())?;
        }
        if let Err(e) = self.graph.add_membership(group, &target.id) {
            if own_group {
                self.forget_group(group);
            }
            return Err(e.into());
        }

        if let Err(e) = self.persist(target, group, own_group) {
            if let Err(cleanup) = self.graph.remove_target(&target.id) {
                warn!(target_id = %target.id, error = %cleanup, "failed to unlink target");
            }
            if own_group {
                self.forget_group(group);
            }
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, target: &Target, group: &GroupId, own_group: bool) -> Result<()> {
        let store = self.tokens.repository();
        store.upsert_target(target.clone())?;

        let linked = if own_group {
            let mut record = Group::new(group.clone(), format!("target-{}", target.hostname))
                .with_member(target.id.clone());
            record.description = format!("Default group for target {}", target.hostname);
            store.upsert_group(record)
        } else {
            store.add_member(group, &target.id).map(|_| ())
        };

        if let Err(e) = linked {
            if let Err(cleanup) = store.delete_target(&target.id) {
                warn!(target_id = %target.id, error = %cleanup, "failed to delete target record");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn forget_group(&self, group: &GroupId) {
        if let Err(e) = self.graph.remove_group(group) {
            warn!(group_id = %group, error = %e, "failed to remove own group");
        }
    }
}

fn own_group_id(target: &TargetId) -> Result<GroupId> {
    GroupId::from_string(format!("target-{target}")).map_err(|e| TokenError::InvalidRequest {
        reason: e.to_string(),
    })
}
