//! Peer addressing and connection establishment.
//!
//! Every listener is addressed by a `host:port` pair. The same normalized form
//! is used for dialing, for comparing the address a record was paired with
//! against the address the user intended, and for deriving secure store keys.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Reasons a `host:port` string can fail to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The host part is empty.
    #[error("address has no host")]
    MissingHost,

    /// No `:port` suffix was present.
    #[error("address has no port")]
    MissingPort,

    /// The host contains characters no hostname or IP literal can.
    #[error("invalid host '{0}'")]
    InvalidHost(String),

    /// The port is not an integer in `1..=65535`.
    #[error("invalid port '{0}'. Port must be a number between 1 and 65535")]
    InvalidPort(String),
}

/// A normalized listener address.
///
/// Hosts are trimmed, stripped of IPv6 brackets and lowercased, so
/// `LOCALHOST:60768` and `localhost:60768` name the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    /// Create an address from an already split host and port.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: normalize_host(host),
            port,
        }
    }

    /// Parse a combined address.
    ///
    /// Accepts formats:
    /// - `host:port` (e.g., `10.0.0.5:60768`, `desk.local:60768`)
    /// - `[IPv6]:port` (e.g., `[::1]:60768`)
    ///
    /// # Examples
    ///
    /// ```
    /// use latchkey_core::connection::PeerAddress;
    ///
    /// let addr = PeerAddress::parse("10.0.0.5:60768").unwrap();
    /// assert_eq!(addr.host(), "10.0.0.5");
    /// assert_eq!(addr.port(), 60768);
    /// ```
    pub fn parse(raw: &str) -> std::result::Result<Self, AddressError> {
        let raw = raw.trim();

        let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or(AddressError::MissingPort)?;
            let port = tail.strip_prefix(':').ok_or(AddressError::MissingPort)?;
            (host, port)
        } else {
            let (host, port) = raw.rsplit_once(':').ok_or(AddressError::MissingPort)?;
            if host.contains(':') {
                // Bare IPv6 without brackets is ambiguous
                return Err(AddressError::MissingPort);
            }
            (host, port)
        };

        let host = parse_host(host)?;
        Ok(Self::new(host, parse_port(port)?))
    }

    /// The normalized host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalize a host for comparison and key derivation.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.to_ascii_lowercase()
}

/// Validate a standalone host, returning it without IPv6 brackets.
///
/// IPv6 literals are accepted bare or bracketed. Any other host must not
/// contain `:`, whitespace or URL delimiters.
pub fn parse_host(raw: &str) -> std::result::Result<&str, AddressError> {
    let trimmed = raw.trim();
    let host = trimmed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(trimmed);

    if host.is_empty() {
        return Err(AddressError::MissingHost);
    }
    if host.parse::<Ipv6Addr>().is_ok() {
        return Ok(host);
    }

    let bracketed = host.len() != trimmed.len();
    let bad_char = |c: char| c == ':' || c.is_whitespace() || "/\\@?#[]".contains(c);
    if bracketed || host.contains(bad_char) {
        return Err(AddressError::InvalidHost(trimmed.to_string()));
    }
    Ok(host)
}

/// Parse a port, rejecting zero and anything above 65535.
pub fn parse_port(raw: &str) -> std::result::Result<u16, AddressError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<u32>()
        .ok()
        .filter(|p| (1..=u32::from(u16::MAX)).contains(p))
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| AddressError::InvalidPort(trimmed.to_string()))
}

/// Open one TCP connection to a listener.
///
/// The returned stream is owned by exactly one call; dropping it tears the
/// connection down on every exit path.
///
/// # Errors
///
/// Returns `Error::Timeout` if the connection is not established within
/// `connect_timeout`, or `Error::Connect` with the underlying cause.
pub async fn open(addr: &PeerAddress, connect_timeout: Duration) -> Result<TcpStream> {
    tracing::debug!("Connecting to {}", addr);

    let stream = timeout(
        connect_timeout,
        TcpStream::connect((addr.host(), addr.port())),
    )
    .await
    .map_err(|_| Error::Timeout {
        stage: "connect",
        after: connect_timeout,
    })?
    .map_err(|source| Error::Connect {
        addr: addr.to_string(),
        source,
    })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_with_port() {
        let addr = PeerAddress::parse("10.0.0.5:60768").unwrap();
        assert_eq!(addr.host(), "10.0.0.5");
        assert_eq!(addr.port(), 60768);
    }

    #[test]
    fn test_parse_hostname_is_lowercased() {
        let addr = PeerAddress::parse("Desk.LOCAL:60768").unwrap();
        assert_eq!(addr.host(), "desk.local");
        assert_eq!(addr.to_string(), "desk.local:60768");
    }

    #[test]
    fn test_parse_ipv6_brackets() {
        let addr = PeerAddress::parse("[::1]:60768").unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:60768");
    }

    #[test]
    fn test_parse_whitespace() {
        let addr = PeerAddress::parse("  10.0.0.5:60768  ").unwrap();
        assert_eq!(addr, PeerAddress::new("10.0.0.5", 60768));
    }

    #[test]
    fn test_parse_missing_port() {
        assert_eq!(PeerAddress::parse("10.0.0.5"), Err(AddressError::MissingPort));
        assert_eq!(PeerAddress::parse("[::1]"), Err(AddressError::MissingPort));
        assert_eq!(PeerAddress::parse("fe80::1"), Err(AddressError::MissingPort));
    }

    #[test]
    fn test_parse_missing_host() {
        assert_eq!(PeerAddress::parse(":60768"), Err(AddressError::MissingHost));
    }

    #[test]
    fn test_parse_port_bounds() {
        assert!(matches!(
            PeerAddress::parse("10.0.0.5:0"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            PeerAddress::parse("10.0.0.5:65536"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            PeerAddress::parse("10.0.0.5:abc"),
            Err(AddressError::InvalidPort(_))
        ));
        assert_eq!(PeerAddress::parse("10.0.0.5:65535").unwrap().port(), 65535);
    }

    #[test]
    fn test_parse_host_rejects_delimiters() {
        for raw in ["10.0.0.5:60769", "desk/evil", "a b", "user@desk", "[desk.local]"] {
            assert_eq!(
                parse_host(raw),
                Err(AddressError::InvalidHost(raw.to_string())),
                "{raw}"
            );
        }
        assert_eq!(parse_host("  "), Err(AddressError::MissingHost));
        assert_eq!(parse_host("[]"), Err(AddressError::MissingHost));
        assert!(matches!(
            PeerAddress::parse("bad host:60768"),
            Err(AddressError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_parse_host_accepts_ipv6_literals() {
        assert_eq!(parse_host("[fe80::1]"), Ok("fe80::1"));
        assert_eq!(parse_host("::1"), Ok("::1"));
        assert_eq!(parse_host(" Desk.local "), Ok("Desk.local"));
    }

    #[test]
    fn test_new_strips_brackets() {
        let addr = PeerAddress::new("[FE80::1]", 1);
        assert_eq!(addr.host(), "fe80::1");
    }

    #[tokio::test]
    async fn test_open_refused_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr = PeerAddress::new("127.0.0.1", port);
        let err = open(&addr, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }), "got {err:?}");
        assert!(err.status().is_none());
    }
}
