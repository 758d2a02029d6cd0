//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use blockwatch_api::discord::DiscordClient;
use blockwatch_config::Config;
use blockwatch_core::{CoreError, SqliteStore, TenantId};
use secrecy::SecretString;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(blockwatch_config::config_path)
}

/// Load the config file plus env overrides, then apply `--database`.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = blockwatch_config::load_config_from(&config_file(global))?;
    if let Some(ref database) = global.database {
        cfg.storage.database = Some(database.clone());
    }
    Ok(cfg)
}

pub fn open_store(cfg: &Config) -> Result<SqliteStore, CliError> {
    let path = cfg.storage.database_path();
    tracing::debug!(path = %path.display(), "opening tenant store");
    Ok(SqliteStore::open(path)?)
}

/// Build an authenticated REST client from the `[discord]` section.
pub fn discord_client(cfg: &Config, token: &SecretString) -> Result<Arc<DiscordClient>, CliError> {
    let client = DiscordClient::new(cfg.discord.api_base_url()?, token, &cfg.discord.transport())
        .map_err(|e| CliError::from(CoreError::from(e)))?;
    Ok(Arc::new(client))
}

pub fn parse_tenant_id(raw: &str) -> Result<TenantId, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "id".into(),
        reason: format!("'{raw}' is not a guild id"),
    })
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes { action: action.into() });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(prompt_err)
}
