//! Prometheus rule documents.
//!
//! A [`RuleDocument`] is the rendered artifact for one group: the exact
//! structure written to `group-<id>.yml`. Maps are ordered so serializing
//! the same document always yields the same bytes.

use std::collections::BTreeMap;

use aami_core::GroupId;
use serde::{Deserialize, Serialize};

/// A complete rule file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    /// Rule groups, in emission order.
    pub groups: Vec<RuleGroup>,
}

/// A named group of rules inside a rule file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    /// Rule group name.
    pub name: String,
    /// Rules, in emission order.
    pub rules: Vec<Rule>,
}

/// One alerting rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Alert name.
    pub alert: String,
    /// Rendered query.
    pub expr: String,
    /// Pending duration before the alert fires.
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    /// Labels attached to fired alerts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations attached to fired alerts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl RuleDocument {
    /// Creates a document holding a single rule group.
    #[must_use]
    pub fn single(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            groups: vec![RuleGroup {
                name: name.into(),
                rules,
            }],
        }
    }

    /// Total number of rules across all groups.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    /// Returns true if the document holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }

    /// Serializes to rule-file YAML.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parses rule-file YAML.
    ///
    /// # Errors
    ///
    /// Returns the parser error.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// Rule group name for a monitored group: `group_<name>_<id>`.
#[must_use]
pub fn rule_group_name(group_name: &str, group_id: &GroupId) -> String {
    format!("group_{group_name}_{group_id}")
}

/// Alert name for a definition within a group: `<name>_Group_<id>`.
#[must_use]
pub fn alert_name(definition_name: &str, group_id: &GroupId) -> String {
    format!("{definition_name}_Group_{group_id}")
}

/// File name of a group's rule file: `group-<id>.yml`.
#[must_use]
pub fn rule_file_name(group_id: &GroupId) -> String {
    format!("group-{group_id}.yml")
}

/// Extracts the group id from a rule file name, if it is one.
#[must_use]
pub fn group_from_file_name(file_name: &str) -> Option<GroupId> {
    let id = file_name.strip_prefix("group-")?.strip_suffix(".yml")?;
    GroupId::from_string(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(id: &str) -> GroupId {
        GroupId::from_string(id).unwrap()
    }

    fn sample() -> RuleDocument {
        RuleDocument::single(
            rule_group_name("web", &g("g1")),
            vec![Rule {
                alert: alert_name("HighErrorRate", &g("g1")),
                expr: "rate(errors[5m]) > 0.1".to_string(),
                for_duration: Some("5m".to_string()),
                labels: BTreeMap::from([
                    ("severity".to_string(), "critical".to_string()),
                    ("group_id".to_string(), "g1".to_string()),
                ]),
                annotations: BTreeMap::from([(
                    "summary".to_string(),
                    "HighErrorRate".to_string(),
                )]),
            }],
        )
    }

    #[test]
    fn yaml_layout_matches_rule_file_format() {
        let yaml = sample().to_yaml().unwrap();
        let lines: Vec<&str> = yaml.lines().collect();
        assert_eq!(lines[0], "groups:");
        assert_eq!(lines[1], "- name: group_web_g1");
        assert_eq!(lines[2], "  rules:");
        assert_eq!(lines[3], "  - alert: HighErrorRate_Group_g1");
        assert!(lines[4].starts_with("    expr: "));
        assert!(yaml.contains("    for: 5m\n"));
        // Sorted map keys keep the output byte-stable.
        let group_id = yaml.find("group_id: g1").unwrap();
        let severity = yaml.find("severity: critical").unwrap();
        assert!(group_id < severity);
        assert_eq!(yaml, sample().to_yaml().unwrap());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let doc = RuleDocument::single(
            "g",
            vec![Rule {
                alert: "A".to_string(),
                expr: "up == 0".to_string(),
                for_duration: None,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            }],
        );
        let yaml = doc.to_yaml().unwrap();
        assert!(!yaml.contains("for:"));
        assert!(!yaml.contains("labels"));
    }

    #[test]
    fn parse_back() {
        let doc = sample();
        let parsed = RuleDocument::from_yaml(&doc.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.rule_count(), 1);
    }

    #[test]
    fn file_names() {
        assert_eq!(rule_file_name(&g("web-1")), "group-web-1.yml");
        assert_eq!(group_from_file_name("group-web-1.yml"), Some(g("web-1")));
        assert_eq!(group_from_file_name("group-web-1.yml.tmp"), None);
        assert_eq!(group_from_file_name("other.yml"), None);
    }
}
