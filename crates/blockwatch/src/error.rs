//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable
//! help text and a process exit code.

use miette::Diagnostic;
use thiserror::Error;

use blockwatch_config::ConfigError;
use blockwatch_core::{CoreError, QueryError, StoreError, SurfaceError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("No Discord bot token configured")]
    #[diagnostic(
        code(blockwatch::no_token),
        help(
            "Export the token in ${env}, or store it with: blockwatch config set-token\n\
             A plaintext `token` under [discord] in the config file also works."
        )
    )]
    NoToken { env: String },

    #[error("Discord rejected the bot token: {message}")]
    #[diagnostic(
        code(blockwatch::auth_failed),
        help("Reset the token in the Discord developer portal, then run: blockwatch config set-token")
    )]
    AuthFailed { message: String },

    #[error("Missing Discord permission: {message}")]
    #[diagnostic(
        code(blockwatch::forbidden),
        help("The bot needs Manage Channels, View Channel, Connect and Send Messages in the guild.")
    )]
    Forbidden { message: String },

    // ── Connectivity ─────────────────────────────────────────────────
    #[error("Discord is unreachable: {message}")]
    #[diagnostic(code(blockwatch::discord))]
    Discord { message: String },

    #[error("Gateway error: {message}")]
    #[diagnostic(
        code(blockwatch::gateway),
        help("Check network access to gateway.discord.gg and that the MESSAGE_CONTENT intent is enabled.")
    )]
    Gateway { message: String },

    #[error("Query to {address} timed out")]
    #[diagnostic(
        code(blockwatch::query_timeout),
        help("Check that `enable-query=true` is set in server.properties and the query port is reachable.")
    )]
    QueryTimeout { address: String },

    #[error("Could not query {address}: {reason}")]
    #[diagnostic(code(blockwatch::query_failed), help("Is the server up?"))]
    QueryFailed { address: String, reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Tenant '{id}' not found")]
    #[diagnostic(code(blockwatch::not_found), help("Run: blockwatch tenants list"))]
    TenantNotFound { id: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(blockwatch::validation))]
    Validation { field: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(blockwatch::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration / storage ──────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(blockwatch::config),
        help("Inspect the resolved configuration with: blockwatch config show")
    )]
    Config(ConfigError),

    #[error(transparent)]
    #[diagnostic(code(blockwatch::store))]
    Store(#[from] StoreError),

    // ── IO / rendering ───────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(blockwatch::render))]
    Render(String),

    #[error("{0}")]
    #[diagnostic(code(blockwatch::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoToken { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Forbidden { .. } => exit_code::PERMISSION,
            Self::Discord { .. } | Self::Gateway { .. } | Self::QueryFailed { .. } => exit_code::CONNECTION,
            Self::QueryTimeout { .. } => exit_code::TIMEOUT,
            Self::TenantNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Store(_) | Self::Io(_) | Self::Render(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }

    /// Attach the queried address to a query failure.
    pub fn from_query(address: &str, err: QueryError) -> Self {
        match err {
            QueryError::TimedOut => Self::QueryTimeout {
                address: address.to_owned(),
            },
            other => Self::QueryFailed {
                address: address.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoToken => Self::NoToken {
                env: blockwatch_config::DiscordSection::default().token_env,
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<SurfaceError> for CliError {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::Forbidden { message } => Self::Forbidden { message },
            SurfaceError::Unavailable { message } => Self::Discord { message },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Query(e) => Self::QueryFailed {
                address: "server".into(),
                reason: e.to_string(),
            },
            CoreError::Surface(e) => e.into(),
            CoreError::Store(e) => Self::Store(e),
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Gateway { message } => Self::Gateway { message },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(CliError::from(ConfigError::NoToken).exit_code(), exit_code::AUTH);
        assert_eq!(
            CliError::from_query("mc.example.net", QueryError::TimedOut).exit_code(),
            exit_code::TIMEOUT
        );
        assert_eq!(
            CliError::TenantNotFound { id: "7".into() }.exit_code(),
            exit_code::NOT_FOUND
        );
        let forbidden = CoreError::Surface(SurfaceError::Forbidden {
            message: "Missing Permissions".into(),
        });
        assert_eq!(CliError::from(forbidden).exit_code(), exit_code::PERMISSION);
    }

    #[test]
    fn no_token_names_default_env_var() {
        let err = CliError::from(ConfigError::NoToken);
        assert!(matches!(err, CliError::NoToken { ref env } if env == "DISCORD_TOKEN"));
    }
}
