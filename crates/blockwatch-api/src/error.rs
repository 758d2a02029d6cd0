use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `blockwatch-api` crate.
///
/// Covers every failure mode across the wire clients: the UDP game
/// query, the Discord REST API, and the Discord gateway.
/// `blockwatch-core` maps these into its port-level error types.
#[derive(Debug, Error)]
pub enum Error {
    // ── Game query ──────────────────────────────────────────────────
    /// The server did not answer within the query deadline.
    #[error("Query timed out after {}ms", .timeout.as_millis())]
    QueryTimeout { timeout: Duration },

    /// The remote host actively refused the datagram (ICMP port unreachable).
    #[error("Connection refused by {address}")]
    ConnectionRefused { address: String },

    /// DNS lookup failed or yielded no addresses.
    #[error("Could not resolve {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    /// The reply did not follow the query protocol.
    #[error("Malformed query reply: {0}")]
    Protocol(String),

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Discord REST ────────────────────────────────────────────────
    /// Bot token rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The bot lacks permission for this action (HTTP 403).
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// The resource does not exist or is not visible to the bot (HTTP 404).
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Rate limited by Discord. Includes retry-after in milliseconds.
    #[error("Rate limited -- retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other structured Discord error.
    #[error("Discord API error (HTTP {status}): {message}")]
    Discord {
        message: String,
        code: Option<u64>,
        status: u16,
    },

    // ── Gateway ─────────────────────────────────────────────────────
    /// Gateway connection failed.
    #[error("Gateway connection failed: {0}")]
    GatewayConnect(String),

    /// Gateway closed with a code that forbids reconnecting.
    #[error("Gateway closed (code {code}): {reason}")]
    GatewayClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::QueryTimeout { .. }
            | Self::ConnectionRefused { .. }
            | Self::Unresolvable { .. }
            | Self::RateLimited { .. }
            | Self::GatewayConnect(_) => true,
            Self::Discord { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the platform refused the action for lack of permissions.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_failures_are_transient() {
        let timeout = Error::QueryTimeout {
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_transient());
        assert!(!timeout.is_forbidden());
        assert_eq!(timeout.to_string(), "Query timed out after 1000ms");
    }

    #[test]
    fn forbidden_is_not_transient() {
        let err = Error::Forbidden {
            message: "Missing Permissions".into(),
        };
        assert!(err.is_forbidden());
        assert!(!err.is_transient());
    }

    #[test]
    fn server_side_discord_errors_are_transient() {
        let err = Error::Discord {
            message: "upstream".into(),
            code: None,
            status: 502,
        };
        assert!(err.is_transient());

        let err = Error::Discord {
            message: "Invalid Form Body".into(),
            code: Some(50035),
            status: 400,
        };
        assert!(!err.is_transient());
    }
}
