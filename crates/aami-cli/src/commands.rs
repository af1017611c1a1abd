//! Command implementations.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aami_core::{GroupId, GroupRepository, InMemoryStore, TokenId};
use aami_graph::RelationshipGraph;
use aami_rules::{ReloadCoordinator, RuleEngine, RuleError, RuleFileWriter, RulesConfig};
use aami_token::{TokenManager, TokenRequest};
use chrono::{Duration, Utc};
use tracing::info;

use crate::cli::{Commands, TokenCommands};
use crate::error::CliError;
use crate::output::{
    HealthView, IssuedTokenView, OutputFormat, ReloadView, RuleFileList, TokenInfo, TokenList,
};
use crate::state;

/// Loads the configuration file (or defaults) and applies flag overrides.
///
/// # Errors
///
/// Returns `RuleError::Config` if the file is unreadable or the result is
/// invalid.
pub fn resolve_config(
    path: Option<&Path>,
    base_url: Option<&str>,
    rule_path: Option<&Path>,
) -> Result<RulesConfig, RuleError> {
    let mut config = match path {
        Some(path) => RulesConfig::from_file(path)?,
        None => RulesConfig::default(),
    };
    if let Some(url) = base_url {
        config.reload.base_url = url.to_string();
    }
    if let Some(rule_path) = rule_path {
        config.rule_path = rule_path.to_path_buf();
    }
    config.validate()?;
    Ok(config)
}

/// Everything a command runs against.
pub struct Session {
    config: RulesConfig,
    state_path: PathBuf,
    store: Arc<InMemoryStore>,
    graph: Arc<RelationshipGraph>,
}

impl Session {
    /// Loads the state file and hydrates the relationship graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or its groups do not
    /// form a valid graph.
    pub fn open(config: RulesConfig, state_path: impl Into<PathBuf>) -> Result<Self, CliError> {
        let state_path = state_path.into();
        let store = Arc::new(state::load(&state_path)?);
        let graph = Arc::new(RelationshipGraph::from_groups(&store.list_groups()?)?);
        Ok(Self {
            config,
            state_path,
            store,
            graph,
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &RulesConfig {
        &self.config
    }

    fn engine(&self) -> Result<RuleEngine<InMemoryStore>, CliError> {
        Ok(RuleEngine::from_config(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.graph),
        )?)
    }

    fn tokens(&self) -> TokenManager<InMemoryStore> {
        TokenManager::new(Arc::clone(&self.store))
    }

    fn save(&self) -> Result<(), CliError> {
        state::save(&self.state_path, &self.store)
    }

    /// Executes one command, writing its result to `out`.
    ///
    /// # Errors
    ///
    /// Returns error if the command fails.
    pub async fn execute<W: Write>(
        &self,
        command: &Commands,
        out: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        match command {
            Commands::Generate { group } => self.generate(out, format, group.as_deref()).await,
            Commands::Delete { group } => self.delete(out, format, group).await,
            Commands::Restore { group } => self.restore(out, format, group).await,
            Commands::Reload => self.reload(out, format).await,
            Commands::Health => self.health(out, format).await,
            Commands::List => self.list(out, format).await,
            Commands::Token { command } => self.token(out, format, command),
        }
    }

    async fn generate<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        group: Option<&str>,
    ) -> Result<(), CliError> {
        let engine = self.engine()?;
        let report = match group {
            Some(group) => engine.regenerate_group(&GroupId::from_string(group)?).await?,
            None => engine.regenerate_all().await?,
        };
        format.write(out, &report)
    }

    async fn delete<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        group: &str,
    ) -> Result<(), CliError> {
        let report = self
            .engine()?
            .remove_group_rules(&GroupId::from_string(group)?)
            .await?;
        format.write(out, &report)
    }

    async fn restore<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        group: &str,
    ) -> Result<(), CliError> {
        let engine = self.engine()?;
        engine.writer().restore(&GroupId::from_string(group)?).await?;
        engine.reloader().mark_pending();
        let outcome = engine.reloader().reload().await?;
        format.write(
            out,
            &ReloadView {
                url: engine.reloader().base_url().to_string(),
                outcome,
            },
        )
    }

    async fn reload<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let reloader = ReloadCoordinator::from_config(&self.config.reload)?;
        let outcome = reloader.reload().await?;
        format.write(
            out,
            &ReloadView {
                url: reloader.base_url().to_string(),
                outcome,
            },
        )
    }

    async fn health<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let reloader = ReloadCoordinator::from_config(&self.config.reload)?;
        let ready = reloader.health_check().await;
        format.write(
            out,
            &HealthView {
                url: reloader.base_url().to_string(),
                ready,
            },
        )
    }

    async fn list<W: Write>(&self, out: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let writer = RuleFileWriter::new(&self.config.rule_path);
        let groups = writer.list_rule_files().await?;
        format.write(
            out,
            &RuleFileList {
                rule_dir: self.config.rule_path.display().to_string(),
                groups: groups.iter().map(ToString::to_string).collect(),
            },
        )
    }

    fn token<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        command: &TokenCommands,
    ) -> Result<(), CliError> {
        let manager = self.tokens();
        match command {
            TokenCommands::Issue {
                name,
                uses,
                ttl_days,
                labels,
            } => {
                if *ttl_days <= 0 {
                    return Err(CliError::InvalidArgument(
                        "--ttl-days must be positive".to_string(),
                    ));
                }
                let mut request = TokenRequest::new(name)
                    .with_usage_limit(*uses)
                    .with_ttl(Duration::days(*ttl_days));
                for label in labels {
                    let (key, value) = parse_label(label)?;
                    request = request.with_label(key, value);
                }

                let issued = manager.issue(request)?;
                self.save()?;
                info!(token_id = %issued.token.id, "token issued and state saved");
                format.write(
                    out,
                    &IssuedTokenView {
                        token: TokenInfo::new(&issued.token, Utc::now()),
                        secret: issued.secret.as_str().to_string(),
                    },
                )
            }
            TokenCommands::List => {
                let now = Utc::now();
                let tokens = manager
                    .list()?
                    .iter()
                    .map(|t| TokenInfo::new(t, now))
                    .collect();
                format.write(out, &TokenList { tokens })
            }
            TokenCommands::Revoke { id } => {
                let token = manager.revoke(&TokenId::from_string(id.as_str())?)?;
                self.save()?;
                format.write(
                    out,
                    &TokenList {
                        tokens: vec![TokenInfo::new(&token, Utc::now())],
                    },
                )
            }
        }
    }
}

fn parse_label(label: &str) -> Result<(&str, &str), CliError> {
    match label.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CliError::InvalidArgument(format!(
            "label '{label}' must be KEY=VALUE"
        ))),
    }
}
