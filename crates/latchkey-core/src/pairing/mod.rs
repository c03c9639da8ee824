//! Pairing bootstrap client.
//!
//! Pairing runs over a single connection and never backtracks:
//!
//! ```text
//! Client                                   Listener
//!   |-- "ROUTE pair\n" ----------------------->|
//!   |-- {"operation":"hello",...}\n ---------->|
//!   |<-- {"operation":"peer_key",...}\n -------|
//!   |-- register frame, then half-close ------>|
//!   |<-- nonce || ciphertext, then close ------|
//! ```
//!
//! The peer key is checked (operation tag, version, expiry, fingerprint)
//! before any secret material is generated. The whole exchange runs under
//! `handshake_timeout`.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::time::timeout;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::connection::{self, PeerAddress};
use crate::crypto::{self, AckEnvelope, FrameProvider, PeerKey, MIN_ACK_LEN};
use crate::error::{Error, Result};
use crate::link::BootstrapLink;
use crate::protocol::{self, Frame, Route};
use crate::trust::{SecureStore, TrustRecord, TrustStore, DEVICE_KEY_LEN};

const HELLO_OPERATION: &str = "hello";
const PEER_KEY_OPERATION: &str = "peer_key";
const ERROR_OPERATION: &str = "error";

#[derive(Debug, Serialize)]
struct Hello<'a> {
    operation: &'static str,
    version: u32,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<&'a str>,
}

/// Tag and version shared by every pairing reply.
#[derive(Debug, Deserialize)]
struct ReplyHeader {
    operation: String,
    #[serde(default)]
    version: Option<u32>,
    #[serde(default, alias = "msg")]
    message: String,
}

/// Client that turns a bootstrap link into a trust record.
#[derive(Clone)]
pub struct PairingClient {
    provider: Arc<dyn FrameProvider>,
    connect_timeout: Duration,
    read_timeout: Duration,
    handshake_timeout: Duration,
    max_reply_bytes: usize,
}

impl PairingClient {
    /// Create a client using the channel and pairing settings of `config`.
    #[must_use]
    pub fn new(provider: Arc<dyn FrameProvider>, config: &Config) -> Self {
        Self {
            provider,
            connect_timeout: config.channel.connect_timeout,
            read_timeout: config.channel.read_timeout,
            handshake_timeout: config.pairing.handshake_timeout,
            max_reply_bytes: config.channel.max_reply_bytes,
        }
    }

    /// Run the handshake and return the new record, without persisting it.
    ///
    /// The record is addressed to the link's listener. Callers that persist it
    /// must first compare that address against the one the user intended.
    ///
    /// # Errors
    ///
    /// Returns `Error::Link` if the link has expired, `Error::Timeout` if the
    /// handshake exceeds its bound, and protocol, transport or provider
    /// errors from the individual steps.
    pub async fn pair(&self, link: &BootstrapLink, device_id: &str) -> Result<TrustRecord> {
        let now = chrono::Utc::now().timestamp();
        link.ensure_fresh(now)?;

        timeout(self.handshake_timeout, self.handshake(link, device_id, now))
            .await
            .map_err(|_| Error::Timeout {
                stage: "pairing handshake",
                after: self.handshake_timeout,
            })?
    }

    /// Pair, check the result against `intended`, and save it.
    ///
    /// Nothing is written on any failure.
    ///
    /// # Errors
    ///
    /// Returns `Error::AddressMismatch` if the new record is not for
    /// `intended`, plus every error of [`pair`](Self::pair).
    pub async fn pair_and_save<S: SecureStore>(
        &self,
        link: &BootstrapLink,
        intended: &PeerAddress,
        trust: &TrustStore<S>,
    ) -> Result<TrustRecord> {
        let device_id = trust.device_id()?;
        let record = self.pair(link, &device_id).await?;
        record.ensure_address(intended)?;
        trust.save(&record)?;
        Ok(record)
    }

    async fn handshake(
        &self,
        link: &BootstrapLink,
        device_id: &str,
        now: i64,
    ) -> Result<TrustRecord> {
        let addr = link.address();
        let stream = connection::open(&addr, self.connect_timeout).await?;
        let mut stream = BufReader::new(stream);

        tracing::debug!("Pairing with {} (link v{})", addr, link.version);

        protocol::write_preamble(&mut stream, Route::Pairing).await?;

        let hello = Hello {
            operation: HELLO_OPERATION,
            version: link.version,
            token: &link.token,
            fingerprint: link.fingerprint.as_deref(),
        };
        let hello = Zeroizing::new(protocol::encode_line(&hello)?);
        protocol::write_all(&mut stream, &hello, "hello").await?;

        let line = protocol::read_line_with_timeout(
            &mut stream,
            self.max_reply_bytes,
            self.read_timeout,
            "peer_key",
        )
        .await?;
        let (peer_key, public_key) = verify_peer_key(&line, link, now)?;

        tracing::debug!("Received peer key {} from {}", peer_key.key_id, addr);

        let device_key = Zeroizing::new(crypto::random_bytes::<DEVICE_KEY_LEN>());
        let register =
            self.provider
                .build_register_frame(&peer_key, &link.token, device_id, &device_key)?;
        let frame = Frame::from_provider(register.frame, "register")?;

        protocol::write_all(&mut stream, frame.as_bytes(), "register").await?;
        stream
            .get_mut()
            .shutdown()
            .await
            .map_err(|source| Error::Write {
                stage: "register",
                source,
            })?;

        let ack = protocol::read_to_end_with_timeout(
            &mut stream,
            self.max_reply_bytes,
            self.read_timeout,
            "ack",
        )
        .await?;

        let envelope = AckEnvelope::split(&ack).ok_or_else(|| Error::Protocol {
            stage: "ack",
            reason: format!(
                "acknowledgement is {} bytes, minimum is {MIN_ACK_LEN}",
                ack.len()
            ),
        })?;
        let verified = Zeroizing::new(self.provider.decrypt_ack(&envelope, &register.context)?);

        tracing::info!(
            "Paired with {} (key {}, {} byte public key, {} byte ack)",
            addr,
            peer_key.key_id,
            public_key.len(),
            verified.len()
        );

        Ok(TrustRecord::new(
            device_id,
            *device_key,
            &addr,
            &peer_key.public_key_b64,
        ))
    }
}

/// Validate the peer key line, returning the key and its decoded bytes.
fn verify_peer_key(line: &[u8], link: &BootstrapLink, now: i64) -> Result<(PeerKey, Vec<u8>)> {
    let body = protocol::trim_line(line);

    let header: ReplyHeader = serde_json::from_slice(body).map_err(|e| Error::BadReply {
        stage: "peer_key",
        reason: e.to_string(),
        raw: line.to_vec(),
    })?;

    if header.operation == ERROR_OPERATION {
        return Err(Error::Protocol {
            stage: "peer_key",
            reason: if header.message.is_empty() {
                "listener refused pairing".to_string()
            } else {
                format!("listener refused pairing: {}", header.message)
            },
        });
    }

    if header.operation != PEER_KEY_OPERATION {
        return Err(Error::Protocol {
            stage: "peer_key",
            reason: format!("expected '{PEER_KEY_OPERATION}', got '{}'", header.operation),
        });
    }

    if header.version != Some(link.version) {
        return Err(Error::Protocol {
            stage: "peer_key",
            reason: format!(
                "expected version {}, got {}",
                link.version,
                header
                    .version
                    .map_or_else(|| "none".to_string(), |v| v.to_string())
            ),
        });
    }

    let key: PeerKey = serde_json::from_slice(body).map_err(|e| Error::BadReply {
        stage: "peer_key",
        reason: e.to_string(),
        raw: line.to_vec(),
    })?;

    if now >= key.expires_at {
        return Err(Error::Protocol {
            stage: "peer_key",
            reason: format!("peer key {} expired at {}", key.key_id, key.expires_at),
        });
    }

    let public_key = BASE64_STANDARD
        .decode(key.public_key_b64.trim())
        .map_err(|e| Error::Protocol {
            stage: "peer_key",
            reason: format!("peer public key is not valid base64: {e}"),
        })?;
    if public_key.is_empty() {
        return Err(Error::Protocol {
            stage: "peer_key",
            reason: "peer public key is empty".to_string(),
        });
    }

    let actual = crypto::fingerprint(&public_key);
    let pinned = [
        ("bootstrap link", link.fingerprint.as_deref()),
        ("listener", key.fingerprint.as_deref()),
    ];
    for (source, expected) in pinned {
        if let Some(expected) = expected {
            if !crypto::fingerprints_match(expected, &actual) {
                return Err(Error::Protocol {
                    stage: "peer_key",
                    reason: format!("peer key fingerprint does not match the {source}"),
                });
            }
        }
    }

    Ok((key, public_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn link(fingerprint: Option<&str>) -> BootstrapLink {
        BootstrapLink {
            version: 3,
            host: "127.0.0.1".to_string(),
            port: 60769,
            token: "abc123".to_string(),
            fingerprint: fingerprint.map(ToString::to_string),
            expires_at: None,
        }
    }

    fn peer_key_line(extra: &serde_json::Value) -> Vec<u8> {
        let mut value = serde_json::json!({
            "operation": "peer_key",
            "version": 3,
            "key_id": "k1",
            "public_key_b64": BASE64_STANDARD.encode(b"listener-public-key"),
            "expires_at": NOW + 60,
        });
        if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        let mut line = serde_json::to_vec(&value).unwrap();
        line.push(b'\n');
        line
    }

    #[test]
    fn test_verify_peer_key_accepts_valid() {
        let (key, public_key) =
            verify_peer_key(&peer_key_line(&serde_json::json!({})), &link(None), NOW).unwrap();
        assert_eq!(key.key_id, "k1");
        assert_eq!(public_key, b"listener-public-key");
    }

    #[test]
    fn test_verify_peer_key_wrong_tag() {
        let line = peer_key_line(&serde_json::json!({"operation": "hello"}));
        let err = verify_peer_key(&line, &link(None), NOW).unwrap_err();
        assert!(matches!(err, Error::Protocol { stage: "peer_key", .. }), "{err:?}");
    }

    #[test]
    fn test_verify_peer_key_wrong_version() {
        let line = peer_key_line(&serde_json::json!({"version": 2}));
        assert!(matches!(
            verify_peer_key(&line, &link(None), NOW),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_verify_peer_key_error_reply_surfaces_message() {
        let line = b"{\"operation\":\"error\",\"message\":\"token already used\"}\n";
        match verify_peer_key(line, &link(None), NOW).unwrap_err() {
            Error::Protocol { reason, .. } => assert!(reason.contains("token already used")),
            e => panic!("expected Protocol, got {e:?}"),
        }
    }

    #[test]
    fn test_verify_peer_key_expired() {
        let line = peer_key_line(&serde_json::json!({"expires_at": NOW - 1}));
        assert!(matches!(
            verify_peer_key(&line, &link(None), NOW),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_verify_peer_key_fingerprint_pinning() {
        let good = crypto::fingerprint(b"listener-public-key");
        let line = peer_key_line(&serde_json::json!({}));

        let upper_with_colons = good
            .to_uppercase()
            .as_bytes()
            .chunks(2)
            .map(|c| String::from_utf8_lossy(c).to_string())
            .collect::<Vec<_>>()
            .join(":");
        assert!(verify_peer_key(&line, &link(Some(&upper_with_colons)), NOW).is_ok());

        let bad = "00".repeat(32);
        assert!(matches!(
            verify_peer_key(&line, &link(Some(&bad)), NOW),
            Err(Error::Protocol { .. })
        ));

        let advertised_bad = peer_key_line(&serde_json::json!({"fingerprint": bad}));
        assert!(matches!(
            verify_peer_key(&advertised_bad, &link(None), NOW),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_verify_peer_key_not_json() {
        let err = verify_peer_key(b"PEER KEY\n", &link(None), NOW).unwrap_err();
        assert!(matches!(err, Error::BadReply { .. }));
    }

    #[test]
    fn test_verify_peer_key_bad_base64() {
        let line = peer_key_line(&serde_json::json!({"public_key_b64": "@@@"}));
        assert!(matches!(
            verify_peer_key(&line, &link(None), NOW),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_hello_omits_missing_fingerprint() {
        let hello = Hello {
            operation: HELLO_OPERATION,
            version: 3,
            token: "abc123",
            fingerprint: None,
        };
        let line = protocol::encode_line(&hello).unwrap();
        assert_eq!(
            protocol::trim_line(&line),
            br#"{"operation":"hello","version":3,"token":"abc123"}"#
        );
    }
}
