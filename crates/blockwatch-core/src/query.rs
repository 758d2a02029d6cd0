// ── Game server query port ──
//
// `QueryClient` is the engine's only view of the game server. The real
// implementation wraps `blockwatch_api::MinecraftQuery`.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use blockwatch_api::MinecraftQuery;
use thiserror::Error;

use crate::model::ObservedState;

/// Why a query produced no observation. Every variant is transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query timed out")]
    TimedOut,

    #[error("connection to {address} refused")]
    ConnectionRefused { address: String },

    #[error("could not resolve {host}")]
    Unresolvable { host: String },

    #[error("malformed reply: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    /// One bounded round trip against `address:port`.
    async fn query(&self, address: &str, port: u16, timeout: Duration) -> Result<ObservedState, QueryError>;

    /// Resolve `address` to the IPs a query would target.
    async fn resolve(&self, address: &str, port: u16) -> Result<Vec<IpAddr>, QueryError>;
}

fn map_error(err: blockwatch_api::Error, address: &str, port: u16) -> QueryError {
    use blockwatch_api::Error as E;

    match err {
        E::QueryTimeout { .. } => QueryError::TimedOut,
        E::ConnectionRefused { address } => QueryError::ConnectionRefused { address },
        E::Unresolvable { host, .. } => QueryError::Unresolvable { host },
        E::Io(e) => QueryError::ConnectionRefused {
            address: format!("{address}:{port} ({e})"),
        },
        other => QueryError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl QueryClient for MinecraftQuery {
    async fn query(&self, address: &str, port: u16, timeout: Duration) -> Result<ObservedState, QueryError> {
        let status = MinecraftQuery::query(self, address, port, timeout)
            .await
            .map_err(|e| map_error(e, address, port))?;

        Ok(ObservedState {
            online: status.online,
            capacity: status.max,
            roster: status.players.into_iter().collect::<BTreeSet<_>>(),
            motd: status.motd,
        })
    }

    async fn resolve(&self, address: &str, port: u16) -> Result<Vec<IpAddr>, QueryError> {
        let addrs = MinecraftQuery::resolve(self, address, port)
            .await
            .map_err(|e| map_error(e, address, port))?;
        Ok(addrs.into_iter().map(|a| a.ip()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_query_errors() {
        let timeout = blockwatch_api::Error::QueryTimeout {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(map_error(timeout, "h", 1), QueryError::TimedOut);

        let dns = blockwatch_api::Error::Unresolvable {
            host: "nowhere.invalid".into(),
            reason: "nxdomain".into(),
        };
        assert_eq!(
            map_error(dns, "nowhere.invalid", 1),
            QueryError::Unresolvable {
                host: "nowhere.invalid".into()
            }
        );

        let bad = blockwatch_api::Error::Protocol("short".into());
        assert!(matches!(map_error(bad, "h", 1), QueryError::Protocol(_)));
    }
}
