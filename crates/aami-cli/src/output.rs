//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use aami_core::BootstrapToken;
use aami_rules::{EngineReport, GroupAction, ReloadOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

fn reload_label(reload: Option<ReloadOutcome>) -> &'static str {
    match reload {
        Some(ReloadOutcome::Reloaded) => "reloaded",
        Some(ReloadOutcome::Skipped) => "skipped (disabled)",
        None => "not needed",
    }
}

impl TableDisplay for EngineReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{:<24}  {:<10}  {:>5}  {:>7}", "GROUP", "ACTION", "RULES", "SKIPPED")?;
        writeln!(writer, "{}", "─".repeat(52))?;

        for group in &self.groups {
            let (action, rules) = match &group.action {
                GroupAction::Written { rule_count, .. } => ("written", rule_count.to_string()),
                GroupAction::Deleted => ("deleted", "-".to_string()),
                GroupAction::Unchanged => ("unchanged", "-".to_string()),
            };
            writeln!(
                writer,
                "{:<24}  {:<10}  {:>5}  {:>7}",
                truncate(group.group_id.as_str(), 24),
                action,
                rules,
                group.failures.len()
            )?;
            for failure in &group.failures {
                writeln!(writer, "  ! {}: {}", failure.definition_id, failure.message)?;
            }
        }

        writeln!(writer)?;
        writeln!(writer, "Reload: {}", reload_label(self.reload))?;
        Ok(())
    }
}

/// Result of a standalone reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadView {
    /// Backend base URL.
    pub url: String,
    /// What happened.
    pub outcome: ReloadOutcome,
}

impl TableDisplay for ReloadView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}: {}", self.url, reload_label(Some(self.outcome)))?;
        Ok(())
    }
}

/// Backend readiness.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    /// Backend base URL.
    pub url: String,
    /// Whether the backend reported ready.
    pub ready: bool,
}

impl TableDisplay for HealthView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let status = if self.ready { "ready" } else { "not ready" };
        writeln!(writer, "{}: {status}", self.url)?;
        Ok(())
    }
}

/// Groups with a rule file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct RuleFileList {
    /// Rule directory.
    pub rule_dir: String,
    /// Group ids.
    pub groups: Vec<String>,
}

impl TableDisplay for RuleFileList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.groups.is_empty() {
            writeln!(writer, "No rule files in {}", self.rule_dir)?;
            return Ok(());
        }
        for group in &self.groups {
            writeln!(writer, "{group}")?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} file(s) in {}", self.groups.len(), self.rule_dir)?;
        Ok(())
    }
}

/// A token as shown to operators. Never includes the hash.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    /// Token ID.
    pub id: String,
    /// Token name.
    pub name: String,
    /// Current state.
    pub state: String,
    /// Uses consumed.
    pub usage_count: u32,
    /// Use limit.
    pub usage_limit: u32,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

impl TokenInfo {
    /// Builds the view of a token at `now`.
    #[must_use]
    pub fn new(token: &BootstrapToken, now: DateTime<Utc>) -> Self {
        Self {
            id: token.id.to_string(),
            name: token.name.clone(),
            state: token.state_at(now).as_str().to_string(),
            usage_count: token.usage_count,
            usage_limit: token.usage_limit,
            expires_at: token.expires_at,
        }
    }
}

/// List of tokens for display.
#[derive(Debug, Clone, Serialize)]
pub struct TokenList {
    /// Tokens, oldest first.
    pub tokens: Vec<TokenInfo>,
}

impl TableDisplay for TokenList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.tokens.is_empty() {
            writeln!(writer, "No tokens")?;
            return Ok(());
        }

        writeln!(
            writer,
            "{:<36}  {:<16}  {:<9}  {:>7}  {:<20}",
            "ID", "NAME", "STATE", "USES", "EXPIRES"
        )?;
        writeln!(writer, "{}", "─".repeat(96))?;
        for token in &self.tokens {
            writeln!(
                writer,
                "{:<36}  {:<16}  {:<9}  {:>7}  {:<20}",
                token.id,
                truncate(&token.name, 16),
                token.state,
                format!("{}/{}", token.usage_count, token.usage_limit),
                token.expires_at.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
        Ok(())
    }
}

/// A freshly issued token, including its one-time secret.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokenView {
    /// The token.
    #[serde(flatten)]
    pub token: TokenInfo,
    /// Plaintext secret, shown once.
    pub secret: String,
}

impl TableDisplay for IssuedTokenView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Token issued")?;
        writeln!(writer, "  ID:       {}", self.token.id)?;
        writeln!(writer, "  Name:     {}", self.token.name)?;
        writeln!(writer, "  Uses:     {}", self.token.usage_limit)?;
        writeln!(writer, "  Expires:  {}", self.token.expires_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(writer)?;
        writeln!(writer, "  Secret:   {}", self.secret)?;
        writeln!(writer)?;
        writeln!(writer, "The secret is not stored and cannot be shown again.")?;
        Ok(())
    }
}

/// Truncates to `max` characters, marking the cut with `…`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
