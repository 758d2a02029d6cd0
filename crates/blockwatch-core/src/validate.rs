// ── Setup input validation ──
//
// Syntax checks for the server address and port given to `setup`, and the
// address-range policy that keeps the bot from probing private networks.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9]+(-[a-z0-9]+)*\.)+[a-z]{2,63}$").expect("valid regex"));

/// A syntactically valid query target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub host: String,
    pub port: u16,
}

impl ServerTarget {
    /// The host as an IP literal, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
    }
}

/// Rejections, rendered as the reply shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is not a valid port number, please try again.")]
    InvalidPort(String),

    #[error("{0} is not a valid domain or IP address, please try again.")]
    InvalidAddress(String),

    #[error("{0} is a private IP. I won't be able to query it.")]
    PrivateAddress(String),
}

/// Parse `address[:port]` plus an optional separate port argument.
///
/// A port embedded in `address` wins over `port_arg`; with neither,
/// `default_port` is used. Host names are case-folded.
pub fn parse_target(address: &str, port_arg: Option<&str>, default_port: u16) -> Result<ServerTarget, ValidationError> {
    let (host, port_text) = match address.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (address, port_arg),
    };

    let port = match port_text {
        Some(text) => parse_port(text)?,
        None => default_port,
    };

    let host = host.trim().to_ascii_lowercase();
    if host.parse::<Ipv4Addr>().is_err() && !DOMAIN_RE.is_match(&host) {
        return Err(ValidationError::InvalidAddress(host));
    }

    Ok(ServerTarget { host, port })
}

fn parse_port(text: &str) -> Result<u16, ValidationError> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| ValidationError::InvalidPort(text.trim().to_owned()))
}

/// Addresses the bot refuses to query: loopback, private, link-local,
/// unspecified, and their IPv6 counterparts.
pub fn is_restricted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_restricted(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

/// Reject `target` if its literal, or any address it resolved to, is restricted.
pub fn check_public(target: &ServerTarget, resolved: &[IpAddr]) -> Result<(), ValidationError> {
    let literal = target.ip().into_iter();
    if literal.chain(resolved.iter().copied()).any(is_restricted) {
        return Err(ValidationError::PrivateAddress(target.host.clone()));
    }
    Ok(())
}
