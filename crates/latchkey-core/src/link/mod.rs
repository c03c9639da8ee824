//! Bootstrap link decoding.
//!
//! A listener displays a QR code (or a copyable link) that carries everything
//! needed to start pairing:
//!
//! ```text
//! latchkey://pair?v=3&host=10.0.0.5&port=60769&token=abc123&fp=…&exp=1700000300
//! ```
//!
//! Decoding is pure: no I/O, and the only input besides the string is the
//! current time used for the expiry check.
//!
//! ## Accepted parameters
//!
//! | Field | Spellings |
//! |-------|-----------|
//! | version | `v`, `version` (default: latest) |
//! | token | `token` |
//! | address | `host` + `port`, or `addr` / `server` as `host:port` |
//! | fingerprint | `fp`, `fingerprint` |
//! | expiry | `exp`, `expires`, `expires_at` (unix seconds) |

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use url::Url;

use crate::connection::{self, AddressError, PeerAddress};

/// Name of the pairing endpoint inside a link.
pub const PAIR_ENDPOINT: &str = "pair";

/// Bootstrap versions this client understands, latest first.
pub const SUPPORTED_VERSIONS: &[u32] = &[3, 2];

/// Version assumed when a link does not name one.
pub const LATEST_VERSION: u32 = 3;

/// Reasons a bootstrap link is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Not a pairing link for this system
    #[error("not a pairing link")]
    NotRecognized,

    /// A required parameter is absent
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    /// Port is not an integer in `1..=65535`
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// The link's expiry time has passed
    #[error("link expired at {expires_at}")]
    Expired {
        /// Unix time the link stopped being valid
        expires_at: i64,
    },

    /// Version is not one this client supports
    #[error("unsupported link version '{0}'")]
    UnsupportedVersion(String),

    /// An optional parameter is present but unreadable
    #[error("invalid value for parameter '{0}'")]
    InvalidParameter(&'static str),
}

/// A decoded bootstrap descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapLink {
    /// Bootstrap protocol version
    pub version: u32,
    /// Listener host (normalized)
    pub host: String,
    /// Listener port
    pub port: u16,
    /// One-time bootstrap credential
    pub token: String,
    /// Expected fingerprint of the listener's public key
    pub fingerprint: Option<String>,
    /// Unix time after which the link is void
    pub expires_at: Option<i64>,
}

impl BootstrapLink {
    /// Decode a link using the default scheme and the current time.
    pub fn decode(raw: &str) -> Result<Self, LinkError> {
        LinkDecoder::default().decode(raw)
    }

    /// The listener address.
    #[must_use]
    pub fn address(&self) -> PeerAddress {
        PeerAddress::new(&self.host, self.port)
    }

    /// Fail with [`LinkError::Expired`] if the link is past its expiry.
    pub fn ensure_fresh(&self, now: i64) -> Result<(), LinkError> {
        match self.expires_at {
            Some(expires_at) if now >= expires_at => Err(LinkError::Expired { expires_at }),
            _ => Ok(()),
        }
    }

    /// Render the canonical link for `scheme`.
    #[must_use]
    pub fn to_uri(&self, scheme: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("v", &self.version.to_string())
            .append_pair("host", &self.host)
            .append_pair("port", &self.port.to_string())
            .append_pair("token", &self.token);
        if let Some(fp) = &self.fingerprint {
            query.append_pair("fp", fp);
        }
        if let Some(exp) = self.expires_at {
            query.append_pair("exp", &exp.to_string());
        }
        format!("{scheme}://{PAIR_ENDPOINT}?{}", query.finish())
    }
}

impl fmt::Debug for BootstrapLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapLink")
            .field("version", &self.version)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("fingerprint", &self.fingerprint)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Decoder bound to one deep-link scheme.
#[derive(Debug, Clone)]
pub struct LinkDecoder {
    scheme: String,
}

impl Default for LinkDecoder {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SCHEME)
    }
}

impl LinkDecoder {
    /// Create a decoder for `scheme`.
    #[must_use]
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.trim().trim_end_matches("://").to_ascii_lowercase(),
        }
    }

    /// The scheme this decoder accepts.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Decode against the current time.
    pub fn decode(&self, raw: &str) -> Result<BootstrapLink, LinkError> {
        self.decode_at(raw, chrono::Utc::now().timestamp())
    }

    /// Decode against an explicit `now` (unix seconds).
    pub fn decode_at(&self, raw: &str, now: i64) -> Result<BootstrapLink, LinkError> {
        let url = Url::parse(raw.trim()).map_err(|_| LinkError::NotRecognized)?;

        if !url.scheme().eq_ignore_ascii_case(&self.scheme) || !is_pair_endpoint(&url) {
            return Err(LinkError::NotRecognized);
        }

        let params = Params::from_url(&url);

        let token = params
            .first(&["token"])
            .ok_or(LinkError::MissingParameter("token"))?
            .to_string();

        let version = match params.first(&["v", "version"]) {
            None => LATEST_VERSION,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|v| SUPPORTED_VERSIONS.contains(v))
                .ok_or_else(|| LinkError::UnsupportedVersion(raw.to_string()))?,
        };

        let address = resolve_address(&params)?;

        let fingerprint = params
            .first(&["fp", "fingerprint"])
            .map(ToString::to_string);

        let expires_at = params
            .first(&["exp", "expires", "expires_at"])
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| LinkError::InvalidParameter("expires_at"))
            })
            .transpose()?;

        let link = BootstrapLink {
            version,
            host: address.host().to_string(),
            port: address.port(),
            token,
            fingerprint,
            expires_at,
        };
        link.ensure_fresh(now)?;

        tracing::debug!(
            "Decoded bootstrap link v{} for {} (token {} bytes)",
            link.version,
            address,
            link.token.len()
        );

        Ok(link)
    }
}

fn is_pair_endpoint(url: &Url) -> bool {
    if url.cannot_be_a_base() {
        return url.path().eq_ignore_ascii_case(PAIR_ENDPOINT);
    }

    let host_is_pair = url
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(PAIR_ENDPOINT));
    if host_is_pair {
        return true;
    }

    url.path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty()))
        .is_some_and(|s| s.eq_ignore_ascii_case(PAIR_ENDPOINT))
}

fn resolve_address(params: &Params) -> Result<PeerAddress, LinkError> {
    let combined = params.first(&["addr", "server"]);

    match (params.first(&["host"]), params.first(&["port"])) {
        (Some(host), Some(port)) => {
            let host = connection::parse_host(host).map_err(address_error)?;
            let port = connection::parse_port(port).map_err(address_error)?;
            Ok(PeerAddress::new(host, port))
        }
        (Some(_), None) if combined.is_none() => Err(LinkError::MissingParameter("port")),
        _ => combined
            .ok_or(LinkError::MissingParameter("host"))
            .and_then(|raw| PeerAddress::parse(raw).map_err(address_error)),
    }
}

fn address_error(err: AddressError) -> LinkError {
    match err {
        AddressError::MissingHost => LinkError::MissingParameter("host"),
        AddressError::MissingPort => LinkError::MissingParameter("port"),
        AddressError::InvalidPort(port) => LinkError::InvalidPort(port),
        AddressError::InvalidHost(_) => LinkError::InvalidParameter("host"),
    }
}

/// Query parameters, first occurrence wins, blanks ignored.
struct Params(HashMap<String, String>);

impl Params {
    fn from_url(url: &Url) -> Self {
        let mut map = HashMap::new();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            map.entry(key.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
        Self(map)
    }

    fn first(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|name| self.0.get(*name))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn decode(raw: &str) -> Result<BootstrapLink, LinkError> {
        LinkDecoder::default().decode_at(raw, NOW)
    }

    #[test]
    fn test_decode_explicit_host_port() {
        let link = LinkDecoder::new("scheme")
            .decode_at("scheme://pair?v=3&host=10.0.0.5&port=60769&token=abc123", NOW)
            .unwrap();
        assert_eq!(link.version, 3);
        assert_eq!(link.host, "10.0.0.5");
        assert_eq!(link.port, 60769);
        assert_eq!(link.token, "abc123");
        assert!(link.fingerprint.is_none());
        assert!(link.expires_at.is_none());
    }

    #[test]
    fn test_decode_combined_address() {
        let link = decode("latchkey://pair?token=t&addr=Desk.local:60768").unwrap();
        assert_eq!(link.host, "desk.local");
        assert_eq!(link.port, 60768);
        assert_eq!(link.version, LATEST_VERSION);

        let link = decode("latchkey://pair?token=t&server=%5B%3A%3A1%5D%3A60768").unwrap();
        assert_eq!(link.host, "::1");
        assert_eq!(link.address().to_string(), "[::1]:60768");
    }

    #[test]
    fn test_decode_endpoint_in_path() {
        assert!(decode("latchkey:///pair?token=t&addr=10.0.0.5:1").is_ok());
        assert!(decode("latchkey://app/pair?token=t&addr=10.0.0.5:1").is_ok());
        assert!(decode("latchkey:pair?token=t&addr=10.0.0.5:1").is_ok());
    }

    #[test]
    fn test_decode_not_recognized() {
        for raw in [
            "https://pair?token=t&addr=10.0.0.5:1",
            "latchkey://open?token=t&addr=10.0.0.5:1",
            "latchkey://app/settings?token=t",
            "not a link",
            "",
        ] {
            assert_eq!(decode(raw), Err(LinkError::NotRecognized), "{raw}");
        }
    }

    #[test]
    fn test_missing_token_regardless_of_other_fields() {
        for raw in [
            "latchkey://pair",
            "latchkey://pair?host=10.0.0.5&port=60769",
            "latchkey://pair?v=99&addr=10.0.0.5:0&exp=1",
            "latchkey://pair?token=&host=10.0.0.5&port=1",
        ] {
            assert_eq!(
                decode(raw),
                Err(LinkError::MissingParameter("token")),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_missing_address() {
        assert_eq!(
            decode("latchkey://pair?token=t"),
            Err(LinkError::MissingParameter("host"))
        );
        assert_eq!(
            decode("latchkey://pair?token=t&host=10.0.0.5"),
            Err(LinkError::MissingParameter("port"))
        );
    }

    #[test]
    fn test_invalid_host() {
        for host in ["10.0.0.5:60769", "desk%2Fevil", "a%20b", "%5Bdesk%5D"] {
            let raw = format!("latchkey://pair?token=t&host={host}&port=1");
            assert_eq!(
                decode(&raw),
                Err(LinkError::InvalidParameter("host")),
                "{host}"
            );
        }
        assert_eq!(
            decode("latchkey://pair?token=t&addr=a%20b:1"),
            Err(LinkError::InvalidParameter("host"))
        );
    }

    #[test]
    fn test_ipv6_host_parameter() {
        let link = decode("latchkey://pair?token=t&host=%5BFE80%3A%3A1%5D&port=1").unwrap();
        assert_eq!(link.host, "fe80::1");
        assert_eq!(link.address().to_string(), "[fe80::1]:1");

        let link = decode("latchkey://pair?token=t&host=%3A%3A1&port=1").unwrap();
        assert_eq!(link.host, "::1");
    }

    #[test]
    fn test_host_without_port_uses_combined_address() {
        let link = decode("latchkey://pair?token=t&host=10.0.0.5&addr=10.0.0.5:60769").unwrap();
        assert_eq!(link.address().to_string(), "10.0.0.5:60769");

        let link = decode("latchkey://pair?token=t&port=1&server=desk.local:60768").unwrap();
        assert_eq!(link.port, 60768);
    }

    #[test]
    fn test_invalid_port() {
        for port in ["0", "65536", "-1", "http"] {
            let raw = format!("latchkey://pair?token=t&host=h&port={port}");
            assert!(
                matches!(decode(&raw), Err(LinkError::InvalidPort(_))),
                "{port}"
            );
        }
        assert!(matches!(
            decode("latchkey://pair?token=t&addr=h:70000"),
            Err(LinkError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_expired_even_when_otherwise_valid() {
        let raw = format!(
            "latchkey://pair?token=t&host=10.0.0.5&port=60769&exp={}",
            NOW - 1
        );
        assert_eq!(
            decode(&raw),
            Err(LinkError::Expired {
                expires_at: NOW - 1
            })
        );

        let raw = format!("latchkey://pair?token=t&addr=10.0.0.5:60769&expires_at={NOW}");
        assert!(matches!(decode(&raw), Err(LinkError::Expired { .. })));

        let raw = format!("latchkey://pair?token=t&addr=10.0.0.5:60769&exp={}", NOW + 60);
        assert_eq!(decode(&raw).unwrap().expires_at, Some(NOW + 60));
    }

    #[test]
    fn test_unsupported_version() {
        assert_eq!(
            decode("latchkey://pair?v=1&token=t&addr=h:1"),
            Err(LinkError::UnsupportedVersion("1".to_string()))
        );
        assert_eq!(
            decode("latchkey://pair?version=beta&token=t&addr=h:1"),
            Err(LinkError::UnsupportedVersion("beta".to_string()))
        );
        assert_eq!(decode("latchkey://pair?v=2&token=t&addr=h:1").unwrap().version, 2);
    }

    #[test]
    fn test_invalid_expiry() {
        assert_eq!(
            decode("latchkey://pair?token=t&addr=h:1&exp=tomorrow"),
            Err(LinkError::InvalidParameter("expires_at"))
        );
    }

    #[test]
    fn test_fingerprint_aliases() {
        let link = decode("latchkey://pair?token=t&addr=h:1&fingerprint=AB:CD").unwrap();
        assert_eq!(link.fingerprint.as_deref(), Some("AB:CD"));
    }

    #[test]
    fn test_to_uri_decodes_back() {
        let link = BootstrapLink {
            version: 3,
            host: "10.0.0.5".to_string(),
            port: 60769,
            token: "a b&c".to_string(),
            fingerprint: Some("abcd".to_string()),
            expires_at: Some(NOW + 300),
        };
        let uri = link.to_uri("latchkey");
        assert!(uri.starts_with("latchkey://pair?v=3&"));
        assert_eq!(decode(&uri).unwrap(), link);
    }

    #[test]
    fn test_debug_hides_token() {
        let link = decode("latchkey://pair?token=supersecret&addr=h:1").unwrap();
        let debug = format!("{link:?}");
        assert!(!debug.contains("supersecret"));
    }
}
