// ── Core error types ──
//
// Errors surfaced by blockwatch-core to the binary. The port errors
// (`QueryError`, `SurfaceError`, `StoreError`) are wrapped as-is; raw
// `blockwatch_api::Error`s are translated so callers never branch on HTTP
// statuses.

use thiserror::Error;

use crate::query::QueryError;
use crate::store::StoreError;
use crate::surface::SurfaceError;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Port errors ──────────────────────────────────────────────────
    #[error("Game server query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Chat platform error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Gateway error: {message}")]
    Gateway { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<blockwatch_api::Error> for CoreError {
    fn from(err: blockwatch_api::Error) -> Self {
        use blockwatch_api::Error as E;

        match err {
            E::Authentication { message } => CoreError::AuthenticationFailed { message },
            E::QueryTimeout { .. } => CoreError::Query(QueryError::TimedOut),
            E::ConnectionRefused { address } => CoreError::Query(QueryError::ConnectionRefused { address }),
            E::Unresolvable { host, .. } => CoreError::Query(QueryError::Unresolvable { host }),
            E::Protocol(message) => CoreError::Query(QueryError::Protocol(message)),
            E::Forbidden { message } => CoreError::Surface(SurfaceError::Forbidden { message }),
            E::GatewayConnect(message) => CoreError::Gateway { message },
            E::GatewayClosed { code, reason } => CoreError::Gateway {
                message: format!("closed with code {code}: {reason}"),
            },
            E::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            E::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            other @ (E::Io(_)
            | E::Transport(_)
            | E::NotFound { .. }
            | E::RateLimited { .. }
            | E::Discord { .. }) => CoreError::Surface(SurfaceError::Unavailable {
                message: other.to_string(),
            }),
        }
    }
}
