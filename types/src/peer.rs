//! Peer address: host + port of one remote endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// A remote endpoint. Immutable; used as the key for connection and
/// handler-state maps.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// The host part alone. Bans and failure counters are kept per host so
    /// a peer cannot dodge them by reconnecting from another port.
    pub fn host(&self) -> &str {
        &self.ip
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Error returned when an `"ip:port"` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer address: {0}")]
pub struct ParsePeerAddressError(pub String);

impl FromStr for PeerAddress {
    type Err = ParsePeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(2, ':');
        let port = parts.next().and_then(|p| p.parse::<u16>().ok());
        let ip = parts
            .next()
            .map(|ip| ip.trim_start_matches('[').trim_end_matches(']'));
        match (ip, port) {
            (Some(ip), Some(port)) if !ip.is_empty() => Ok(Self::new(ip, port)),
            _ => Err(ParsePeerAddressError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let addr: PeerAddress = "10.0.0.1:8333".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("10.0.0.1", 8333));
        assert_eq!(addr.to_string(), "10.0.0.1:8333");
    }

    #[test]
    fn parse_bracketed_ipv6() {
        let addr: PeerAddress = "[::1]:18444".parse().unwrap();
        assert_eq!(addr.ip, "::1");
        assert_eq!(addr.to_string(), "[::1]:18444");
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!("10.0.0.1".parse::<PeerAddress>().is_err());
        assert!(":8333".parse::<PeerAddress>().is_err());
        assert!("host:notaport".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn from_socket_addr() {
        let sock: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(PeerAddress::from(sock), PeerAddress::new("127.0.0.1", 9000));
    }
}
