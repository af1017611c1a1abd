//! Entity records consumed by the rule lifecycle.
//!
//! - [`Severity`]: Alert severity level
//! - [`AlertDefinition`]: A query template with default parameters
//! - [`AlertActivation`]: A group's reference to a definition, with overrides
//! - [`Group`]: A monitored group, its activations and dependency edges
//! - [`Target`]: A monitored endpoint
//! - [`BootstrapToken`]: A time- and usage-limited registration credential

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DefinitionId, GroupId, TargetId, TokenId};

/// Template parameters: string keys to arbitrary scalar or nested values.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// The severity level of an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational alert, no action required.
    Info,
    /// Warning alert, should be investigated.
    #[default]
    Warning,
    /// Critical alert, requires immediate attention.
    Critical,
}

impl Severity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reusable alert definition.
///
/// The query template is rendered against `default_params` merged with the
/// overrides of whichever group activates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Unique identifier.
    pub id: DefinitionId,
    /// Human-readable name, used as the alert name prefix.
    pub name: String,
    /// Longer description, copied into the `description` annotation.
    #[serde(default)]
    pub description: String,
    /// Severity label attached to generated rules.
    #[serde(default)]
    pub severity: Severity,
    /// Backend query with `{{ placeholder }}` tokens.
    pub query_template: String,
    /// Default template parameters.
    #[serde(default)]
    pub default_params: ParamMap,
    /// Default pending duration (backend duration string, e.g. `5m`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    /// Default labels added to generated rules.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Default annotations added to generated rules.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl AlertDefinition {
    /// Creates a definition with no parameters and `warning` severity.
    pub fn new(
        id: DefinitionId,
        name: impl Into<String>,
        query_template: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            severity: Severity::default(),
            query_template: query_template.into(),
            default_params: ParamMap::new(),
            for_duration: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Adds a default template parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    /// Sets the default pending duration.
    #[must_use]
    pub fn with_for_duration(mut self, duration: impl Into<String>) -> Self {
        self.for_duration = Some(duration.into());
        self
    }

    /// Adds a default label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds a default annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// A group's activation of an alert definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertActivation {
    /// The activated definition.
    pub definition_id: DefinitionId,
    /// Disabled activations are skipped by synthesis.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Parameter overrides, merged over the definition defaults.
    #[serde(default)]
    pub overrides: ParamMap,
    /// Pending duration override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    /// Extra labels for this group.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Extra annotations for this group.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

const fn default_enabled() -> bool {
    true
}

impl AlertActivation {
    /// Creates an enabled activation with no overrides.
    #[must_use]
    pub fn new(definition_id: DefinitionId) -> Self {
        Self {
            definition_id,
            enabled: true,
            overrides: ParamMap::new(),
            for_duration: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Adds a parameter override.
    #[must_use]
    pub fn with_override(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the pending duration override.
    #[must_use]
    pub fn with_for_duration(mut self, duration: impl Into<String>) -> Self {
        self.for_duration = Some(duration.into());
        self
    }
}

/// A monitored group.
///
/// `members` and `depends_on` are the persisted form of the relationship
/// graph; the live graph is authoritative once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier.
    pub id: GroupId,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Member targets, in insertion order.
    #[serde(default)]
    pub members: Vec<TargetId>,
    /// Groups whose activations this group inherits.
    #[serde(default)]
    pub depends_on: Vec<GroupId>,
    /// Alert definitions this group activates.
    #[serde(default)]
    pub activations: Vec<AlertActivation>,
}

impl Group {
    /// Creates an empty group.
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            members: Vec::new(),
            depends_on: Vec::new(),
            activations: Vec::new(),
        }
    }

    /// Adds an activation.
    #[must_use]
    pub fn with_activation(mut self, activation: AlertActivation) -> Self {
        self.activations.push(activation);
        self
    }

    /// Adds a member target.
    #[must_use]
    pub fn with_member(mut self, target: TargetId) -> Self {
        if !self.members.contains(&target) {
            self.members.push(target);
        }
        self
    }

    /// Adds a dependency edge.
    #[must_use]
    pub fn with_dependency(mut self, group: GroupId) -> Self {
        if !self.depends_on.contains(&group) {
            self.depends_on.push(group);
        }
        self
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique identifier.
    pub id: TargetId,
    /// Hostname of the endpoint.
    pub hostname: String,
    /// IP address of the endpoint.
    #[serde(default)]
    pub ip_address: String,
    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Target {
    /// Creates a target.
    pub fn new(id: TargetId, hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            ip_address: ip_address.into(),
            labels: BTreeMap::new(),
        }
    }
}

/// Lifecycle state of a bootstrap token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    /// Usable.
    Active,
    /// Past its expiry time.
    Expired,
    /// Usage counter reached the limit.
    Exhausted,
    /// Revoked by an administrator.
    Revoked,
}

impl TokenState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored bootstrap token. Only the hash of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapToken {
    /// Record identifier.
    pub id: TokenId,
    /// Human-readable name.
    pub name: String,
    /// Hex-encoded hash of the secret value.
    pub secret_hash: String,
    /// Successful uses so far.
    pub usage_count: u32,
    /// Maximum number of successful uses.
    pub usage_limit: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time; the token is invalid strictly after this instant.
    pub expires_at: DateTime<Utc>,
    /// Labels applied to targets registered with this token.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Whether the token was revoked.
    #[serde(default)]
    pub revoked: bool,
}

impl BootstrapToken {
    /// Returns true if `now` is past the expiry time.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Returns true if the usage counter reached the limit.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.usage_count >= self.usage_limit
    }

    /// Returns the number of uses left.
    #[must_use]
    pub const fn remaining_uses(&self) -> u32 {
        self.usage_limit.saturating_sub(self.usage_count)
    }

    /// Returns the state at `now`. Revocation wins, then expiry, then exhaustion.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.revoked {
            TokenState::Revoked
        } else if self.is_expired_at(now) {
            TokenState::Expired
        } else if self.is_exhausted() {
            TokenState::Exhausted
        } else {
            TokenState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(count: u32, limit: u32, ttl: Duration) -> BootstrapToken {
        let now = Utc::now();
        BootstrapToken {
            id: TokenId::new(),
            name: "test".to_string(),
            secret_hash: "00".to_string(),
            usage_count: count,
            usage_limit: limit,
            created_at: now,
            expires_at: now + ttl,
            labels: BTreeMap::new(),
            revoked: false,
        }
    }

    #[test]
    fn severity_serde_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let parsed: Severity = serde_json::from_str("\"info\"").unwrap();
        assert_eq!(parsed, Severity::Info);
    }

    #[test]
    fn activation_defaults_to_enabled() {
        let json = r#"{"definition_id": "cpu"}"#;
        let activation: AlertActivation = serde_json::from_str(json).unwrap();
        assert!(activation.enabled);
        assert!(activation.overrides.is_empty());
    }

    #[test]
    fn group_builders_deduplicate() {
        let t = TargetId::from_string("t1").unwrap();
        let g = Group::new(GroupId::from_string("g1").unwrap(), "web")
            .with_member(t.clone())
            .with_member(t);
        assert_eq!(g.members.len(), 1);
    }

    #[test]
    fn token_state_priority() {
        let now = Utc::now();

        let active = token(0, 2, Duration::hours(1));
        assert_eq!(active.state_at(now), TokenState::Active);

        let exhausted = token(2, 2, Duration::hours(1));
        assert_eq!(exhausted.state_at(now), TokenState::Exhausted);

        // Both expired and exhausted: expiry is reported.
        let both = token(2, 2, Duration::seconds(-1));
        assert_eq!(both.state_at(now), TokenState::Expired);

        let mut revoked = token(0, 2, Duration::seconds(-1));
        revoked.revoked = true;
        assert_eq!(revoked.state_at(now), TokenState::Revoked);
    }

    #[test]
    fn remaining_uses_saturates() {
        assert_eq!(token(3, 2, Duration::hours(1)).remaining_uses(), 0);
        assert_eq!(token(1, 5, Duration::hours(1)).remaining_uses(), 4);
    }
}
