// ── Minecraft query client ──
//
// One bounded round trip against a server's query port: resolve, handshake,
// full stat. Stateless apart from the session id counter.

mod packet;

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::Error;

pub use packet::FullStat;

/// Port the vanilla server listens on for both game and query traffic.
pub const DEFAULT_PORT: u16 = 25565;

/// Largest datagram a full stat reply is expected to fit in.
const MAX_DATAGRAM: usize = 8192;

/// Snapshot of a server returned by a successful query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub online: u32,
    pub max: u32,
    pub players: Vec<String>,
    pub motd: String,
    pub version: Option<String>,
}

impl From<FullStat> for ServerStatus {
    fn from(stat: FullStat) -> Self {
        Self {
            online: stat.online,
            max: stat.max,
            players: stat.players,
            motd: stat.motd,
            version: stat.version,
        }
    }
}

/// Client for the UDP query protocol.
///
/// Cheap to share: each query binds its own ephemeral socket, so
/// concurrent queries from many tenants never contend.
#[derive(Debug, Default)]
pub struct MinecraftQuery {
    next_session: AtomicU32,
}

impl MinecraftQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `host` to socket addresses, IPv4 first.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
        let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Unresolvable {
                host: host.into(),
                reason: e.to_string(),
            })?
            .collect();

        if addrs.is_empty() {
            return Err(Error::Unresolvable {
                host: host.into(),
                reason: "no addresses returned".into(),
            });
        }

        addrs.sort_by_key(|a| a.is_ipv6());
        Ok(addrs)
    }

    /// Query `host:port`, failing if the whole exchange exceeds `timeout`.
    pub async fn query(&self, host: &str, port: u16, timeout: Duration) -> Result<ServerStatus, Error> {
        let seed = self.next_session.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let session = packet::session_id(seed);

        tokio::time::timeout(timeout, self.exchange(host, port, session))
            .await
            .map_err(|_| Error::QueryTimeout { timeout })?
    }

    async fn exchange(&self, host: &str, port: u16, session: u32) -> Result<ServerStatus, Error> {
        let target = self
            .resolve(host, port)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unresolvable {
                host: host.into(),
                reason: "no addresses returned".into(),
            })?;

        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        debug!(%target, session, "query socket connected");

        let mut buf = vec![0u8; MAX_DATAGRAM];

        socket
            .send(&packet::handshake_request(session))
            .await
            .map_err(|e| map_io(e, target))?;
        let len = socket.recv(&mut buf).await.map_err(|e| map_io(e, target))?;
        let challenge = packet::parse_handshake(&buf[..len], session)?;
        trace!(challenge, "handshake complete");

        socket
            .send(&packet::full_stat_request(session, challenge))
            .await
            .map_err(|e| map_io(e, target))?;
        let len = socket.recv(&mut buf).await.map_err(|e| map_io(e, target))?;
        let stat = packet::parse_full_stat(&buf[..len], session)?;

        Ok(ServerStatus::from(stat))
    }
}

fn map_io(err: std::io::Error, target: SocketAddr) -> Error {
    if err.kind() == std::io::ErrorKind::ConnectionRefused {
        Error::ConnectionRefused {
            address: target.to_string(),
        }
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_from_full_stat() {
        let stat = FullStat {
            motd: "hello".into(),
            version: Some("1.21".into()),
            map: None,
            online: 1,
            max: 10,
            players: vec!["Alex".into()],
            raw: std::collections::HashMap::new(),
        };
        let status = ServerStatus::from(stat);
        assert_eq!(status.online, 1);
        assert_eq!(status.max, 10);
        assert_eq!(status.players, vec!["Alex".to_owned()]);
        assert_eq!(status.motd, "hello");
    }

    #[tokio::test]
    async fn resolves_literal_address() {
        let client = MinecraftQuery::new();
        let addrs = client.resolve("127.0.0.1", 25565).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:25565".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn answers_from_loopback_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let session = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]);
            server
                .send_to(&packet::tests::handshake_reply(session, "42"), peer)
                .await
                .unwrap();

            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[7..11], &42_i32.to_be_bytes());
            let reply = packet::tests::stat_reply(
                session,
                &[("hostname", "Loopback"), ("numplayers", "1"), ("maxplayers", "5")],
                &["Steve"],
            );
            server.send_to(&reply, peer).await.unwrap();
        });

        let client = MinecraftQuery::new();
        let status = client
            .query("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(status.motd, "Loopback");
        assert_eq!(status.online, 1);
        assert_eq!(status.max, 5);
        assert_eq!(status.players, vec!["Steve".to_owned()]);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let client = MinecraftQuery::new();
        let err = client
            .query("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::QueryTimeout { .. }), "got {err:?}");
        drop(server);
    }
}
