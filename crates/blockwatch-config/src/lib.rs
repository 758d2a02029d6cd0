//! Configuration for the blockwatch bot.
//!
//! TOML file + `BLOCKWATCH_` environment overrides loaded with `figment`,
//! Discord token resolution (env var, keyring, plaintext), and translation
//! to `blockwatch_core::MonitorConfig` and `blockwatch_api::TransportConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use blockwatch_api::TransportConfig;
use blockwatch_api::discord::{DEFAULT_API_BASE, DEFAULT_GATEWAY_URL};
use blockwatch_api::query::DEFAULT_PORT;
use blockwatch_core::MonitorConfig;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "blockwatch";
/// Keyring entry holding the bot token.
pub const KEYRING_TOKEN_ENTRY: &str = "discord-token";
/// Prefix for environment overrides, e.g. `BLOCKWATCH_MONITOR__POLL_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "BLOCKWATCH_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no Discord bot token configured")]
    NoToken,

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordSection,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscordSection {
    /// Bot token (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the bot token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Prefix chat commands start with.
    #[serde(default = "default_prefix")]
    pub command_prefix: String,

    /// REST request timeout, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: None,
            token_env: default_token_env(),
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
            command_prefix: default_prefix(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_token_env() -> String {
    "DISCORD_TOKEN".into()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.into()
}
fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.into()
}
fn default_prefix() -> String {
    "$".into()
}
fn default_http_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait after a cycle that renamed a display channel.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            cooldown_secs: default_cooldown(),
            query_timeout_ms: default_query_timeout(),
            default_port: default_port(),
        }
    }
}

fn default_poll_interval() -> u64 {
    10
}
fn default_cooldown() -> u64 {
    301
}
fn default_query_timeout() -> u64 {
    1000
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageSection {
    /// SQLite database file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl StorageSection {
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_database_path)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "blockwatch", "blockwatch")
}

fn home_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("blockwatch");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

pub fn default_database_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share").join("blockwatch.db"),
        |dirs| dirs.data_dir().join("blockwatch.db"),
    )
}

// ── Loading & saving ────────────────────────────────────────────────

/// Load config from `path` (missing file is fine) plus environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the canonical path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Validation & translation ────────────────────────────────────────

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.discord.command_prefix;
        if prefix.trim().is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(invalid("discord.command_prefix", "must be non-empty and contain no whitespace"));
        }
        self.discord.api_base_url()?;
        self.discord.gateway_url()?;
        self.monitor.to_monitor_config()?;
        Ok(())
    }
}

impl DiscordSection {
    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        self.api_base
            .parse()
            .map_err(|e| invalid("discord.api_base", format!("{e}: {}", self.api_base)))
    }

    pub fn gateway_url(&self) -> Result<Url, ConfigError> {
        let url: Url = self
            .gateway_url
            .parse()
            .map_err(|e| invalid("discord.gateway_url", format!("{e}: {}", self.gateway_url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid("discord.gateway_url", "expected a ws:// or wss:// URL"));
        }
        Ok(url)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            ..TransportConfig::default()
        }
    }
}

impl MonitorSection {
    pub fn to_monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("monitor.poll_interval_secs", "must be at least 1"));
        }
        if self.query_timeout_ms == 0 {
            return Err(invalid("monitor.query_timeout_ms", "must be at least 1"));
        }
        Ok(MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            cooldown: Duration::from_secs(self.cooldown_secs.max(self.poll_interval_secs)),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            default_port: self.default_port,
        })
    }
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry() -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ENTRY)?)
}

/// Resolve the bot token: `token_env` env var, then keyring, then plaintext.
pub fn resolve_token(discord: &DiscordSection) -> Result<SecretString, ConfigError> {
    if let Some(token) = std::env::var(&discord.token_env).ok().filter(|t| !t.is_empty()) {
        return Ok(SecretString::from(token));
    }

    if let Ok(token) = keyring_entry().and_then(|entry| entry.get_password().map_err(ConfigError::from)) {
        return Ok(SecretString::from(token));
    }

    discord
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or(ConfigError::NoToken)
}

/// Store the bot token in the system keyring.
pub fn store_token(token: &str) -> Result<(), ConfigError> {
    keyring_entry()?.set_password(token)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_match_bot_behaviour() {
        let monitor = MonitorSection::default().to_monitor_config().unwrap();
        assert_eq!(monitor, MonitorConfig::default());
        assert_eq!(DiscordSection::default().command_prefix, "$");
    }

    #[test]
    fn file_and_env_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [discord]
                command_prefix = "!"

                [monitor]
                poll_interval_secs = 30
                "#,
            )?;
            jail.set_env("BLOCKWATCH_MONITOR__COOLDOWN_SECS", "600");
            jail.set_env("BLOCKWATCH_STORAGE__DATABASE", "/tmp/bw.db");

            let config = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(config.discord.command_prefix, "!");
            assert_eq!(config.monitor.poll_interval_secs, 30);
            assert_eq!(config.monitor.cooldown_secs, 600);
            assert_eq!(config.monitor.query_timeout_ms, 1000);
            assert_eq!(config.storage.database_path(), PathBuf::from("/tmp/bw.db"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_gives_defaults() {
        Jail::expect_with(|_| {
            let config = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_bad_values() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[monitor]\npoll_interval_secs = 0\n")?;
            assert!(matches!(
                load_config_from(Path::new("bad.toml")),
                Err(ConfigError::Validation { .. })
            ));

            jail.create_file("gw.toml", "[discord]\ngateway_url = \"https://example.com\"\n")?;
            assert!(matches!(
                load_config_from(Path::new("gw.toml")),
                Err(ConfigError::Validation { .. })
            ));

            jail.create_file("prefix.toml", "[discord]\ncommand_prefix = \" \"\n")?;
            assert!(load_config_from(Path::new("prefix.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn cooldown_never_below_poll_interval() {
        let section = MonitorSection {
            poll_interval_secs: 60,
            cooldown_secs: 5,
            ..MonitorSection::default()
        };
        assert_eq!(section.to_monitor_config().unwrap().cooldown, Duration::from_secs(60));
    }

    #[test]
    fn token_from_env_wins() {
        Jail::expect_with(|jail| {
            jail.set_env("BW_TEST_TOKEN", "from-env");
            let discord = DiscordSection {
                token: Some("from-file".into()),
                token_env: "BW_TEST_TOKEN".into(),
                ..DiscordSection::default()
            };
            assert_eq!(resolve_token(&discord).unwrap().expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn save_writes_toml_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.monitor.default_port = 19132;
        config.storage.database = Some(dir.path().join("db.sqlite"));

        save_config_to(&config, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("default_port = 19132"));
        assert!(!text.contains("token ="));
    }
}
