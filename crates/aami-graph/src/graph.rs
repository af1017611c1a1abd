//! The relationship graph.
//!
//! State is held in a single `GraphState` behind one `RwLock`. Every
//! mutation takes the write lock for its whole duration, so the integrity
//! check and the edge update it guards can never interleave with another
//! writer.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use aami_core::{Group, GroupId, TargetId};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};

#[derive(Debug, Default, Clone)]
struct GroupNode {
    /// Members in insertion order.
    members: Vec<TargetId>,
    /// Outgoing dependency edges.
    depends_on: BTreeSet<GroupId>,
}

#[derive(Debug, Default, Clone)]
struct GraphState {
    groups: BTreeMap<GroupId, GroupNode>,
    memberships: BTreeMap<TargetId, BTreeSet<GroupId>>,
}

impl GraphState {
    fn node(&self, group: &GroupId) -> Result<&GroupNode> {
        self.groups.get(group).ok_or_else(|| GraphError::GroupNotFound {
            group: group.clone(),
        })
    }

    fn require_known(&self, group: &GroupId) -> Result<()> {
        if self.groups.contains_key(group) {
            Ok(())
        } else {
            Err(GraphError::UnknownGroup {
                group: group.clone(),
            })
        }
    }

    fn dependents(&self, group: &GroupId) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|(_, node)| node.depends_on.contains(group))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Breadth-first search along dependency edges. Returns the path from
    /// `from` to `to` inclusive, if one exists.
    fn find_path(&self, from: &GroupId, to: &GroupId) -> Option<Vec<GroupId>> {
        let mut parent: HashMap<&GroupId, &GroupId> = HashMap::new();
        let mut visited: BTreeSet<&GroupId> = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(prev) = parent.get(cursor) {
                    path.push((*prev).clone());
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            let Some(node) = self.groups.get(current) else {
                continue;
            };
            for next in &node.depends_on {
                if visited.insert(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn link_dependency(&mut self, group: &GroupId, depends_on: &GroupId) -> Result<bool> {
        self.require_known(group)?;
        self.require_known(depends_on)?;

        if group == depends_on {
            return Err(GraphError::CircularReference {
                group: group.clone(),
                depends_on: depends_on.clone(),
                cycle: vec![group.clone(), group.clone()],
            });
        }
        if let Some(path) = self.find_path(depends_on, group) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(group.clone());
            cycle.extend(path);
            return Err(GraphError::CircularReference {
                group: group.clone(),
                depends_on: depends_on.clone(),
                cycle,
            });
        }

        Ok(self
            .groups
            .get_mut(group)
            .is_some_and(|node| node.depends_on.insert(depends_on.clone())))
    }

    fn link_member(&mut self, group: &GroupId, target: &TargetId) -> Result<()> {
        let node = self
            .groups
            .get_mut(group)
            .ok_or_else(|| GraphError::UnknownGroup {
                group: group.clone(),
            })?;
        if node.members.contains(target) {
            return Err(GraphError::MembershipExists {
                group: group.clone(),
                target: target.clone(),
            });
        }
        node.members.push(target.clone());
        self.memberships
            .entry(target.clone())
            .or_default()
            .insert(group.clone());
        Ok(())
    }

    fn unlink_member(&mut self, group: &GroupId, target: &TargetId) {
        if let Some(node) = self.groups.get_mut(group) {
            node.members.retain(|t| t != target);
        }
        if let Some(groups) = self.memberships.get_mut(target) {
            groups.remove(group);
            if groups.is_empty() {
                self.memberships.remove(target);
            }
        }
    }
}

/// Group/target membership and group dependency edges.
///
/// Invariants held after every public call:
///
/// - every target known to the graph belongs to at least one group;
/// - dependency edges form a directed acyclic graph;
/// - a target appears at most once in any group's member list.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    state: RwLock<GraphState>,
}

impl RelationshipGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from persisted group records.
    ///
    /// Groups are registered first, then dependency edges (each cycle-checked),
    /// then memberships.
    ///
    /// # Errors
    ///
    /// Returns an error if a group id repeats, a dependency references an
    /// unknown group, or the dependency edges contain a cycle.
    pub fn from_groups(groups: &[Group]) -> Result<Self> {
        let mut state = GraphState::default();
        for group in groups {
            if state.groups.contains_key(&group.id) {
                return Err(GraphError::GroupExists {
                    group: group.id.clone(),
                });
            }
            state.groups.insert(group.id.clone(), GroupNode::default());
        }
        for group in groups {
            for dependency in &group.depends_on {
                state.link_dependency(&group.id, dependency)?;
            }
        }
        for group in groups {
            for target in &group.members {
                match state.link_member(&group.id, target) {
                    Ok(()) | Err(GraphError::MembershipExists { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(
            groups = state.groups.len(),
            targets = state.memberships.len(),
            "relationship graph hydrated"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    // ============ Groups ============

    /// Registers an empty group.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupExists` if the group is already registered.
    pub fn add_group(&self, group: GroupId) -> Result<()> {
        let mut state = self.state.write();
        if state.groups.contains_key(&group) {
            return Err(GraphError::GroupExists { group });
        }
        debug!(group_id = %group, "group added");
        state.groups.insert(group, GroupNode::default());
        Ok(())
    }

    /// Removes a group and all of its edges.
    ///
    /// # Errors
    ///
    /// - `GraphError::GroupNotFound` if the group is unknown
    /// - `GraphError::GroupInUse` if other groups depend on it
    /// - `GraphError::CannotRemoveLastGroup` if it is the only group of a member
    pub fn remove_group(&self, group: &GroupId) -> Result<()> {
        let mut state = self.state.write();
        let node = state.node(group)?;

        let dependents = state.dependents(group);
        if !dependents.is_empty() {
            return Err(GraphError::GroupInUse {
                group: group.clone(),
                dependents,
            });
        }
        for target in &node.members {
            if state.memberships.get(target).is_some_and(|g| g.len() == 1) {
                return Err(GraphError::CannotRemoveLastGroup {
                    group: group.clone(),
                    target: target.clone(),
                });
            }
        }

        let members = node.members.clone();
        for target in &members {
            state.unlink_member(group, target);
        }
        state.groups.remove(group);
        info!(group_id = %group, "group removed from graph");
        Ok(())
    }

    /// Returns true if the group is registered.
    #[must_use]
    pub fn contains_group(&self, group: &GroupId) -> bool {
        self.state.read().groups.contains_key(group)
    }

    /// Returns every registered group, ordered by id.
    #[must_use]
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.state.read().groups.keys().cloned().collect()
    }

    // ============ Membership ============

    /// Adds `target` to `group`. Unknown targets are created implicitly.
    ///
    /// # Errors
    ///
    /// - `GraphError::UnknownGroup` if the group is not registered
    /// - `GraphError::MembershipExists` if the target is already a member
    pub fn add_membership(&self, group: &GroupId, target: &TargetId) -> Result<()> {
        self.state.write().link_member(group, target)?;
        debug!(group_id = %group, target_id = %target, "membership added");
        Ok(())
    }

    /// Removes `target` from `group`.
    ///
    /// # Errors
    ///
    /// - `GraphError::MembershipNotFound` if the target is not a member
    /// - `GraphError::CannotRemoveLastGroup` if this is the target's only group
    pub fn remove_membership(&self, group: &GroupId, target: &TargetId) -> Result<()> {
        let mut state = self.state.write();
        let groups = state
            .memberships
            .get(target)
            .filter(|groups| groups.contains(group))
            .ok_or_else(|| GraphError::MembershipNotFound {
                group: group.clone(),
                target: target.clone(),
            })?;
        if groups.len() == 1 {
            warn!(group_id = %group, target_id = %target, "refusing to remove last group");
            return Err(GraphError::CannotRemoveLastGroup {
                group: group.clone(),
                target: target.clone(),
            });
        }
        state.unlink_member(group, target);
        debug!(group_id = %group, target_id = %target, "membership removed");
        Ok(())
    }

    /// Atomically replaces the group set of `target`.
    ///
    /// Duplicate ids in `groups` are ignored. The target is created if unknown.
    ///
    /// # Errors
    ///
    /// - `GraphError::EmptyGroupSet` if `groups` is empty
    /// - `GraphError::UnknownGroup` if any group is not registered
    pub fn replace_groups(&self, target: &TargetId, groups: &[GroupId]) -> Result<()> {
        if groups.is_empty() {
            return Err(GraphError::EmptyGroupSet {
                target: target.clone(),
            });
        }
        let mut state = self.state.write();
        for group in groups {
            state.require_known(group)?;
        }

        let wanted: BTreeSet<GroupId> = groups.iter().cloned().collect();
        let current = state.memberships.get(target).cloned().unwrap_or_default();
        for group in current.difference(&wanted) {
            state.unlink_member(group, target);
        }
        for group in wanted.difference(&current) {
            state.link_member(group, target)?;
        }
        debug!(target_id = %target, groups = wanted.len(), "target groups replaced");
        Ok(())
    }

    /// Removes a target from every group.
    ///
    /// Returns the groups it was a member of, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::TargetNotFound` if the target is unknown.
    pub fn remove_target(&self, target: &TargetId) -> Result<Vec<GroupId>> {
        let mut state = self.state.write();
        let groups = state
            .memberships
            .remove(target)
            .ok_or_else(|| GraphError::TargetNotFound {
                target: target.clone(),
            })?;
        for group in &groups {
            if let Some(node) = state.groups.get_mut(group) {
                node.members.retain(|t| t != target);
            }
        }
        info!(target_id = %target, "target removed from graph");
        Ok(groups.into_iter().collect())
    }

    /// Returns true if the target is known.
    #[must_use]
    pub fn contains_target(&self, target: &TargetId) -> bool {
        self.state.read().memberships.contains_key(target)
    }

    /// Returns the groups of a target, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::TargetNotFound` if the target is unknown.
    pub fn groups(&self, target: &TargetId) -> Result<Vec<GroupId>> {
        self.state
            .read()
            .memberships
            .get(target)
            .map(|groups| groups.iter().cloned().collect())
            .ok_or_else(|| GraphError::TargetNotFound {
                target: target.clone(),
            })
    }

    /// Returns the members of a group, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupNotFound` if the group is unknown.
    pub fn targets(&self, group: &GroupId) -> Result<Vec<TargetId>> {
        Ok(self.state.read().node(group)?.members.clone())
    }

    // ============ Dependencies ============

    /// Adds the edge `group -> depends_on`.
    ///
    /// The cycle check and the insert run under the same write lock. Adding an
    /// edge that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// - `GraphError::UnknownGroup` if either group is not registered
    /// - `GraphError::CircularReference` if the edge would close a cycle
    pub fn add_dependency(&self, group: &GroupId, depends_on: &GroupId) -> Result<()> {
        let added = self.state.write().link_dependency(group, depends_on)?;
        if added {
            debug!(group_id = %group, depends_on = %depends_on, "dependency added");
        }
        Ok(())
    }

    /// Removes the edge `group -> depends_on`.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupNotFound` if `group` is unknown.
    pub fn remove_dependency(&self, group: &GroupId, depends_on: &GroupId) -> Result<bool> {
        let mut state = self.state.write();
        let node = state
            .groups
            .get_mut(group)
            .ok_or_else(|| GraphError::GroupNotFound {
                group: group.clone(),
            })?;
        Ok(node.depends_on.remove(depends_on))
    }

    /// Returns the direct dependencies of a group, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupNotFound` if the group is unknown.
    pub fn dependencies(&self, group: &GroupId) -> Result<Vec<GroupId>> {
        Ok(self
            .state
            .read()
            .node(group)?
            .depends_on
            .iter()
            .cloned()
            .collect())
    }

    /// Returns the groups that directly depend on `group`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupNotFound` if the group is unknown.
    pub fn dependents(&self, group: &GroupId) -> Result<Vec<GroupId>> {
        let state = self.state.read();
        state.node(group)?;
        Ok(state.dependents(group))
    }

    /// Returns every transitive dependency of `group`, nearest first.
    ///
    /// Groups at the same distance are ordered by id. `group` itself is not
    /// included.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::GroupNotFound` if the group is unknown.
    pub fn ancestors(&self, group: &GroupId) -> Result<Vec<GroupId>> {
        let state = self.state.read();
        let root = state.node(group)?;

        let mut seen: BTreeSet<&GroupId> = BTreeSet::new();
        seen.insert(group);
        let mut queue: VecDeque<&GroupId> = root.depends_on.iter().collect();
        let mut order = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            order.push(next.clone());
            if let Some(node) = state.groups.get(next) {
                queue.extend(node.depends_on.iter());
            }
        }
        Ok(order)
    }
}
