//! Storage collaborator interface.
//!
//! The engine only needs abstract reads and writes on entity records. Token
//! consumption is the one operation that must be a single atomic step in the
//! backing store, see [`BootstrapTokenRepository::consume_if_usable`].
//!
//! [`InMemoryStore`] implements every repository behind `parking_lot` locks and
//! can be (de)serialized as a [`StoreSnapshot`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;
use crate::ids::{DefinitionId, GroupId, TargetId, TokenId};
use crate::types::{AlertDefinition, BootstrapToken, Group, Target};

/// Errors reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type.
        entity: &'static str,
        /// Requested id.
        id: String,
    },

    /// A record with the same id already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Entity type.
        entity: &'static str,
        /// Conflicting id.
        id: String,
    },

    /// The record is still referenced.
    #[error("{entity} {id} is in use: {reason}")]
    InUse {
        /// Entity type.
        entity: &'static str,
        /// Referenced id.
        id: String,
        /// What still references it.
        reason: String,
    },

    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns the error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InUse { .. } => ErrorKind::InUse,
            Self::Backend(_) => ErrorKind::Storage,
        }
    }

    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result of an atomic consume attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The counter was incremented; carries the updated record.
    Consumed(BootstrapToken),
    /// No token with that secret hash.
    NotFound,
    /// The token was revoked.
    Revoked(BootstrapToken),
    /// The token is past its expiry time.
    Expired(BootstrapToken),
    /// The token reached its usage limit.
    Exhausted(BootstrapToken),
}

/// Read/write access to alert definitions.
pub trait AlertDefinitionRepository: Send + Sync {
    /// Gets a definition by id.
    fn get_definition(&self, id: &DefinitionId) -> Result<AlertDefinition, StoreError>;

    /// Lists all definitions, ordered by id.
    fn list_definitions(&self) -> Result<Vec<AlertDefinition>, StoreError>;

    /// Creates or replaces a definition.
    fn upsert_definition(&self, definition: AlertDefinition) -> Result<(), StoreError>;

    /// Deletes a definition. Fails while any group activates it.
    fn delete_definition(&self, id: &DefinitionId) -> Result<(), StoreError>;
}

/// Read/write access to group records.
pub trait GroupRepository: Send + Sync {
    /// Gets a group by id.
    fn get_group(&self, id: &GroupId) -> Result<Group, StoreError>;

    /// Lists all groups, ordered by id.
    fn list_groups(&self) -> Result<Vec<Group>, StoreError>;

    /// Creates or replaces a group.
    fn upsert_group(&self, group: Group) -> Result<(), StoreError>;

    /// Adds a member to a stored group in one step and returns the updated
    /// record. Adding an existing member is a no-op.
    fn add_member(&self, group: &GroupId, target: &TargetId) -> Result<Group, StoreError>;

    /// Deletes a group.
    fn delete_group(&self, id: &GroupId) -> Result<(), StoreError>;
}

/// Read/write access to target records.
pub trait TargetRepository: Send + Sync {
    /// Gets a target by id.
    fn get_target(&self, id: &TargetId) -> Result<Target, StoreError>;

    /// Lists all targets, ordered by id.
    fn list_targets(&self) -> Result<Vec<Target>, StoreError>;

    /// Creates or replaces a target.
    fn upsert_target(&self, target: Target) -> Result<(), StoreError>;

    /// Deletes a target.
    fn delete_target(&self, id: &TargetId) -> Result<(), StoreError>;
}

/// Read/write access to bootstrap tokens.
pub trait BootstrapTokenRepository: Send + Sync {
    /// Stores a new token. Fails if the id or secret hash is already present.
    fn insert_token(&self, token: BootstrapToken) -> Result<(), StoreError>;

    /// Gets a token by record id.
    fn get_token(&self, id: &TokenId) -> Result<BootstrapToken, StoreError>;

    /// Finds a token by the hash of its secret.
    fn find_token_by_hash(&self, secret_hash: &str) -> Result<Option<BootstrapToken>, StoreError>;

    /// Lists all tokens, ordered by creation time.
    fn list_tokens(&self) -> Result<Vec<BootstrapToken>, StoreError>;

    /// Marks a token revoked and returns the updated record.
    fn revoke_token(&self, id: &TokenId) -> Result<BootstrapToken, StoreError>;

    /// Atomically increments the usage counter if the token is usable at `now`.
    ///
    /// The lookup, the revoked/expiry/limit checks and the increment happen as
    /// one step: two concurrent callers can never both pass the limit.
    fn consume_if_usable(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Atomically gives back one use taken by
    /// [`consume_if_usable`](Self::consume_if_usable). The counter never
    /// drops below zero.
    fn release_use(&self, id: &TokenId) -> Result<BootstrapToken, StoreError>;
}

/// Serializable contents of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Alert definitions.
    #[serde(default)]
    pub definitions: Vec<AlertDefinition>,
    /// Groups.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Targets.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Bootstrap tokens.
    #[serde(default)]
    pub tokens: Vec<BootstrapToken>,
}

#[derive(Debug, Default)]
struct TokenTable {
    by_id: HashMap<TokenId, BootstrapToken>,
    id_by_hash: HashMap<String, TokenId>,
}

/// In-memory implementation of every repository.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    definitions: RwLock<HashMap<DefinitionId, AlertDefinition>>,
    groups: RwLock<HashMap<GroupId, Group>>,
    targets: RwLock<HashMap<TargetId, Target>>,
    tokens: Mutex<TokenTable>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated from a snapshot.
    ///
    /// # Errors
    ///
    /// - `StoreError::AlreadyExists` if the snapshot contains duplicate ids
    /// - `StoreError::Backend` if a token has counted more uses than its limit
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        for definition in snapshot.definitions {
            let mut definitions = store.definitions.write();
            if definitions.contains_key(&definition.id) {
                return Err(StoreError::AlreadyExists {
                    entity: "definition",
                    id: definition.id.to_string(),
                });
            }
            definitions.insert(definition.id.clone(), definition);
        }
        for group in snapshot.groups {
            let mut groups = store.groups.write();
            if groups.contains_key(&group.id) {
                return Err(StoreError::AlreadyExists {
                    entity: "group",
                    id: group.id.to_string(),
                });
            }
            groups.insert(group.id.clone(), group);
        }
        for target in snapshot.targets {
            store.upsert_target(target)?;
        }
        for token in snapshot.tokens {
            if token.usage_count > token.usage_limit {
                return Err(StoreError::Backend(format!(
                    "corrupt snapshot: token {} has {} uses over a limit of {}",
                    token.id, token.usage_count, token.usage_limit
                )));
            }
            store.insert_token(token)?;
        }
        Ok(store)
    }

    /// Returns a copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut definitions: Vec<_> = self.definitions.read().values().cloned().collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        let mut groups: Vec<_> = self.groups.read().values().cloned().collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        let mut targets: Vec<_> = self.targets.read().values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        let mut tokens: Vec<_> = self.tokens.lock().by_id.values().cloned().collect();
        tokens.sort_by_key(|t| t.created_at);
        StoreSnapshot {
            definitions,
            groups,
            targets,
            tokens,
        }
    }
}

impl AlertDefinitionRepository for InMemoryStore {
    fn get_definition(&self, id: &DefinitionId) -> Result<AlertDefinition, StoreError> {
        self.definitions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("definition", id))
    }

    fn list_definitions(&self) -> Result<Vec<AlertDefinition>, StoreError> {
        let mut all: Vec<_> = self.definitions.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn upsert_definition(&self, definition: AlertDefinition) -> Result<(), StoreError> {
        debug!(definition_id = %definition.id, "upserting alert definition");
        self.definitions
            .write()
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    fn delete_definition(&self, id: &DefinitionId) -> Result<(), StoreError> {
        // Lock order: groups before definitions.
        let groups = self.groups.read();
        let mut definitions = self.definitions.write();
        if !definitions.contains_key(id) {
            return Err(StoreError::not_found("definition", id));
        }
        if let Some(group) = groups
            .values()
            .find(|g| g.activations.iter().any(|a| &a.definition_id == id))
        {
            return Err(StoreError::InUse {
                entity: "definition",
                id: id.to_string(),
                reason: format!("activated by group {}", group.id),
            });
        }
        definitions.remove(id);
        Ok(())
    }
}

impl GroupRepository for InMemoryStore {
    fn get_group(&self, id: &GroupId) -> Result<Group, StoreError> {
        self.groups
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", id))
    }

    fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let mut all: Vec<_> = self.groups.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn upsert_group(&self, group: Group) -> Result<(), StoreError> {
        self.groups.write().insert(group.id.clone(), group);
        Ok(())
    }

    fn add_member(&self, group: &GroupId, target: &TargetId) -> Result<Group, StoreError> {
        let mut groups = self.groups.write();
        let record = groups
            .get_mut(group)
            .ok_or_else(|| StoreError::not_found("group", group))?;
        if !record.members.contains(target) {
            record.members.push(target.clone());
        }
        Ok(record.clone())
    }

    fn delete_group(&self, id: &GroupId) -> Result<(), StoreError> {
        self.groups
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("group", id))
    }
}

impl TargetRepository for InMemoryStore {
    fn get_target(&self, id: &TargetId) -> Result<Target, StoreError> {
        self.targets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("target", id))
    }

    fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let mut all: Vec<_> = self.targets.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn upsert_target(&self, target: Target) -> Result<(), StoreError> {
        self.targets.write().insert(target.id.clone(), target);
        Ok(())
    }

    fn delete_target(&self, id: &TargetId) -> Result<(), StoreError> {
        self.targets
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("target", id))
    }
}

impl BootstrapTokenRepository for InMemoryStore {
    fn insert_token(&self, token: BootstrapToken) -> Result<(), StoreError> {
        let mut table = self.tokens.lock();
        if table.by_id.contains_key(&token.id) || table.id_by_hash.contains_key(&token.secret_hash)
        {
            return Err(StoreError::AlreadyExists {
                entity: "token",
                id: token.id.to_string(),
            });
        }
        table
            .id_by_hash
            .insert(token.secret_hash.clone(), token.id.clone());
        table.by_id.insert(token.id.clone(), token);
        Ok(())
    }

    fn get_token(&self, id: &TokenId) -> Result<BootstrapToken, StoreError> {
        self.tokens
            .lock()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("token", id))
    }

    fn find_token_by_hash(&self, secret_hash: &str) -> Result<Option<BootstrapToken>, StoreError> {
        let table = self.tokens.lock();
        Ok(table
            .id_by_hash
            .get(secret_hash)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    fn list_tokens(&self) -> Result<Vec<BootstrapToken>, StoreError> {
        let mut all: Vec<_> = self.tokens.lock().by_id.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }

    fn revoke_token(&self, id: &TokenId) -> Result<BootstrapToken, StoreError> {
        let mut table = self.tokens.lock();
        let token = table
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("token", id))?;
        token.revoked = true;
        Ok(token.clone())
    }

    fn consume_if_usable(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut table = self.tokens.lock();
        let Some(id) = table.id_by_hash.get(secret_hash).cloned() else {
            return Ok(ConsumeOutcome::NotFound);
        };
        let Some(token) = table.by_id.get_mut(&id) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        if token.revoked {
            return Ok(ConsumeOutcome::Revoked(token.clone()));
        }
        if token.is_expired_at(now) {
            return Ok(ConsumeOutcome::Expired(token.clone()));
        }
        if token.is_exhausted() {
            return Ok(ConsumeOutcome::Exhausted(token.clone()));
        }

        token.usage_count += 1;
        Ok(ConsumeOutcome::Consumed(token.clone()))
    }

    fn release_use(&self, id: &TokenId) -> Result<BootstrapToken, StoreError> {
        let mut table = self.tokens.lock();
        let token = table
            .by_id
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("token", id))?;
        token.usage_count = token.usage_count.saturating_sub(1);
        Ok(token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertActivation;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn def(id: &str) -> AlertDefinition {
        AlertDefinition::new(DefinitionId::from_string(id).unwrap(), id, "up == 0")
    }

    fn token(hash: &str, limit: u32, ttl: Duration) -> BootstrapToken {
        let now = Utc::now();
        BootstrapToken {
            id: TokenId::new(),
            name: "t".to_string(),
            secret_hash: hash.to_string(),
            usage_count: 0,
            usage_limit: limit,
            created_at: now,
            expires_at: now + ttl,
            labels: BTreeMap::new(),
            revoked: false,
        }
    }

    #[test]
    fn definitions_crud() {
        let store = InMemoryStore::new();
        store.upsert_definition(def("b")).unwrap();
        store.upsert_definition(def("a")).unwrap();

        let listed = store.list_definitions().unwrap();
        assert_eq!(listed[0].id.as_str(), "a");
        assert_eq!(listed[1].id.as_str(), "b");

        let id = DefinitionId::from_string("a").unwrap();
        store.delete_definition(&id).unwrap();
        let err = store.get_definition(&id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn definition_in_use_cannot_be_deleted() {
        let store = InMemoryStore::new();
        store.upsert_definition(def("cpu")).unwrap();
        let id = DefinitionId::from_string("cpu").unwrap();
        let group = Group::new(GroupId::from_string("g").unwrap(), "g")
            .with_activation(AlertActivation::new(id.clone()));
        store.upsert_group(group).unwrap();

        let err = store.delete_definition(&id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InUse);
        assert!(store.get_definition(&id).is_ok());
    }

    #[test]
    fn consume_checks_in_priority_order() {
        let store = InMemoryStore::new();
        store.insert_token(token("live", 1, Duration::hours(1))).unwrap();
        store.insert_token(token("old", 1, Duration::seconds(-1))).unwrap();
        let now = Utc::now();

        assert_eq!(
            store.consume_if_usable("missing", now).unwrap(),
            ConsumeOutcome::NotFound
        );
        assert!(matches!(
            store.consume_if_usable("old", now).unwrap(),
            ConsumeOutcome::Expired(_)
        ));
        assert!(matches!(
            store.consume_if_usable("live", now).unwrap(),
            ConsumeOutcome::Consumed(t) if t.usage_count == 1
        ));
        assert!(matches!(
            store.consume_if_usable("live", now).unwrap(),
            ConsumeOutcome::Exhausted(t) if t.usage_count == 1
        ));
    }

    #[test]
    fn duplicate_token_hash_rejected() {
        let store = InMemoryStore::new();
        store.insert_token(token("h", 1, Duration::hours(1))).unwrap();
        let err = store.insert_token(token("h", 1, Duration::hours(1))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn add_member_is_atomic_under_contention() {
        let store = Arc::new(InMemoryStore::new());
        let web = GroupId::from_string("web").unwrap();
        store.upsert_group(Group::new(web.clone(), "web")).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let web = web.clone();
                std::thread::spawn(move || store.add_member(&web, &TargetId::new()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_group(&web).unwrap().members.len(), 16);
    }

    #[test]
    fn add_member_to_unknown_group_fails() {
        let store = InMemoryStore::new();
        let err = store
            .add_member(&GroupId::from_string("ghost").unwrap(), &TargetId::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn release_use_gives_back_one_use() {
        let store = InMemoryStore::new();
        let t = token("h", 2, Duration::hours(1));
        let id = t.id.clone();
        store.insert_token(t).unwrap();
        store.consume_if_usable("h", Utc::now()).unwrap();

        assert_eq!(store.release_use(&id).unwrap().usage_count, 0);
        assert_eq!(store.release_use(&id).unwrap().usage_count, 0);
    }

    #[test]
    fn snapshot_with_overused_token_is_corrupt() {
        let mut t = token("h", 2, Duration::hours(1));
        t.usage_count = 3;
        let snapshot = StoreSnapshot {
            tokens: vec![t],
            ..StoreSnapshot::default()
        };
        let err = InMemoryStore::from_snapshot(snapshot).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("corrupt snapshot"));
    }

    #[test]
    fn snapshot_round_trip_preserves_records() {
        let store = InMemoryStore::new();
        store.upsert_definition(def("cpu")).unwrap();
        store
            .upsert_group(Group::new(GroupId::from_string("g").unwrap(), "g"))
            .unwrap();
        store.insert_token(token("h", 3, Duration::hours(1))).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = InMemoryStore::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.snapshot(), store.snapshot());
    }
}
