//! Rule engine configuration.
//!
//! Configuration for the rule lifecycle, including:
//! - Rule output directory
//! - External validator (promtool)
//! - Backup location
//! - Backend reload endpoint

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RuleError;

/// Default directory for generated rule files.
pub const DEFAULT_RULE_PATH: &str = "/etc/prometheus/rules/generated";

/// Default backend base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:9090";

/// Default timeout, in seconds, for reload calls and validator runs.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Name of the validator binary searched on `PATH`.
pub const PROMTOOL_BINARY: &str = "promtool";

/// Configuration for the external rule validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Whether rule files are validated before they are written.
    pub enabled: bool,
    /// Path to the validator. Searched on `PATH` when unset.
    pub promtool_path: Option<PathBuf>,
    /// Validator timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            promtool_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Configuration for rule file backups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Whether the previous file is backed up before each write or delete.
    pub enabled: bool,
    /// Backup directory. Defaults to `<rule_path>/.backup`.
    pub path: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Configuration for the backend reload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReloadConfig {
    /// Whether the backend is signalled after writes.
    pub enabled: bool,
    /// Backend base URL.
    pub base_url: String,
    /// Reload request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Main rule engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RulesConfig {
    /// Directory the rule files are written to.
    pub rule_path: PathBuf,
    /// Validator configuration.
    pub validation: ValidationConfig,
    /// Backup configuration.
    pub backup: BackupConfig,
    /// Reload configuration.
    pub reload: ReloadConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rule_path: PathBuf::from(DEFAULT_RULE_PATH),
            validation: ValidationConfig::default(),
            backup: BackupConfig::default(),
            reload: ReloadConfig::default(),
        }
    }
}

impl RulesConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RuleError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, RuleError> {
        let config: Self =
            toml::from_str(content).map_err(|e| RuleError::config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.rule_path.as_os_str().is_empty() {
            return Err(RuleError::config("rule_path cannot be empty"));
        }

        if !self.reload.base_url.starts_with("http://")
            && !self.reload.base_url.starts_with("https://")
        {
            return Err(RuleError::config(
                "reload.base_url must start with http:// or https://",
            ));
        }

        if self.reload.timeout_secs == 0 {
            return Err(RuleError::config(
                "reload.timeout_secs must be greater than 0",
            ));
        }

        if self.validation.timeout_secs == 0 {
            return Err(RuleError::config(
                "validation.timeout_secs must be greater than 0",
            ));
        }

        if let Some(path) = &self.backup.path {
            if path.as_os_str().is_empty() {
                return Err(RuleError::config("backup.path cannot be empty when set"));
            }
        }

        Ok(())
    }

    /// Returns the backup directory, or `None` when backups are disabled.
    #[must_use]
    pub fn backup_dir(&self) -> Option<PathBuf> {
        if !self.backup.enabled {
            return None;
        }
        Some(
            self.backup
                .path
                .clone()
                .unwrap_or_else(|| self.rule_path.join(".backup")),
        )
    }

    /// Returns the validator binary to run, or `None` when validation is off.
    ///
    /// Without an explicit path the binary is looked up on `PATH`; if it is
    /// not found validation is disabled with a warning.
    #[must_use]
    pub fn resolve_validator(&self) -> Option<PathBuf> {
        if !self.validation.enabled {
            return None;
        }
        if let Some(path) = &self.validation.promtool_path {
            return Some(path.clone());
        }
        match which::which(PROMTOOL_BINARY) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "promtool not found in PATH, validation will be disabled");
                None
            }
        }
    }

    /// Reload timeout as a duration.
    #[must_use]
    pub const fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload.timeout_secs)
    }

    /// Validator timeout as a duration.
    #[must_use]
    pub const fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_config_uses_defaults() {
        let config = RulesConfig::from_toml("").unwrap();
        assert_eq!(config.rule_path, PathBuf::from(DEFAULT_RULE_PATH));
        assert!(!config.validation.enabled);
        assert!(config.backup.enabled);
        assert!(config.reload.enabled);
        assert_eq!(config.reload.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.reload_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.backup_dir(),
            Some(PathBuf::from(DEFAULT_RULE_PATH).join(".backup"))
        );
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            rule_path = "/tmp/rules"

            [validation]
            enabled = true
            promtool_path = "/usr/local/bin/promtool"
            timeout_secs = 5

            [backup]
            enabled = true
            path = "/var/backups/rules"

            [reload]
            enabled = false
            base_url = "https://prometheus.internal:9090"
            timeout_secs = 10
        "#;

        let config = RulesConfig::from_toml(toml).unwrap();
        assert_eq!(config.rule_path, PathBuf::from("/tmp/rules"));
        assert_eq!(
            config.resolve_validator(),
            Some(PathBuf::from("/usr/local/bin/promtool"))
        );
        assert_eq!(config.validation_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.backup_dir(),
            Some(PathBuf::from("/var/backups/rules"))
        );
        assert!(!config.reload.enabled);
        assert_eq!(config.reload.timeout_secs, 10);
    }

    #[test]
    fn disabled_backup_has_no_dir() {
        let config = RulesConfig::from_toml("[backup]\nenabled = false").unwrap();
        assert_eq!(config.backup_dir(), None);
    }

    #[test]
    fn disabled_validation_resolves_nothing() {
        let config = RulesConfig::from_toml(
            "[validation]\nenabled = false\npromtool_path = \"/bin/true\"",
        )
        .unwrap();
        assert_eq!(config.resolve_validator(), None);
    }

    #[test]
    fn invalid_base_url_rejected() {
        let err = RulesConfig::from_toml("[reload]\nbase_url = \"ftp://x\"").unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(RulesConfig::from_toml("[reload]\ntimeout_secs = 0").is_err());
        assert!(RulesConfig::from_toml("[validation]\ntimeout_secs = 0").is_err());
    }

    #[test]
    fn invalid_toml_rejected() {
        let err = RulesConfig::from_toml("rule_path = [").unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"rule_path = \"/srv/rules\"\n").unwrap();
        let config = RulesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rule_path, PathBuf::from("/srv/rules"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = RulesConfig::from_file("/nonexistent/aami.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
