//! Cryptographic frame provider interface and hashing helpers.
//!
//! Latchkey never implements key encapsulation or AEAD itself. Everything that
//! touches that math goes through a [`FrameProvider`], which hands back
//! ready-to-send frames and verifies handshake acknowledgements. This module
//! only defines the seam and the small amount of hashing the client does on
//! its own (fingerprints and clipboard change tokens).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::protocol::Operation;
use crate::trust::{TrustRecord, DEVICE_KEY_LEN};

/// Length of the nonce that prefixes a handshake acknowledgement.
pub const ACK_NONCE_LEN: usize = 12;

/// Length of the authentication tag at the end of AEAD ciphertext.
pub const AEAD_TAG_LEN: usize = 16;

/// Smallest acknowledgement that can possibly authenticate.
pub const MIN_ACK_LEN: usize = ACK_NONCE_LEN + AEAD_TAG_LEN;

/// Failure reported by a frame provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CryptoError(pub String);

impl CryptoError {
    /// Create a provider error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<CryptoError> for crate::error::Error {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.0)
    }
}

/// Public key material advertised by a listener during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerKey {
    /// Listener-assigned key identifier
    pub key_id: String,
    /// Base64 KEM public key
    pub public_key_b64: String,
    /// Fingerprint the listener claims for this key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Unix time after which the key must not be used
    pub expires_at: i64,
}

/// Key material the provider needs later to open the acknowledgement.
///
/// Opaque to this crate and wiped on drop.
pub struct AckContext(Zeroizing<Vec<u8>>);

impl AckContext {
    /// Wrap provider-defined context bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the raw context.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AckContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckContext")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// A register frame plus the context for decrypting its acknowledgement.
#[derive(Debug)]
pub struct RegisterFrame {
    /// Length-prefixed frame bytes
    pub frame: Vec<u8>,
    /// Context for [`FrameProvider::decrypt_ack`]
    pub context: AckContext,
}

/// Handshake acknowledgement split into nonce and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEnvelope {
    /// Fixed-size nonce prefix
    pub nonce: [u8; ACK_NONCE_LEN],
    /// Ciphertext including the authentication tag
    pub ciphertext: Vec<u8>,
}

impl AckEnvelope {
    /// Split raw acknowledgement bytes.
    ///
    /// Returns `None` if the input is shorter than [`MIN_ACK_LEN`].
    #[must_use]
    pub fn split(raw: &[u8]) -> Option<Self> {
        if raw.len() < MIN_ACK_LEN {
            return None;
        }
        let (nonce, ciphertext) = raw.split_at(ACK_NONCE_LEN);
        let nonce = nonce.try_into().ok()?;
        Some(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Capability that builds authenticated frames and opens acknowledgements.
///
/// Implementations wrap the platform's post-quantum KEM and AEAD. A test
/// double behind the same trait is enough to exercise every client flow.
pub trait FrameProvider: Send + Sync {
    /// Build a length-prefixed frame carrying one command-channel operation.
    fn build_frame(
        &self,
        record: &TrustRecord,
        operation: Operation,
        payload: &[u8],
    ) -> std::result::Result<Vec<u8>, CryptoError>;

    /// Build the register frame that completes pairing.
    fn build_register_frame(
        &self,
        peer_key: &PeerKey,
        token: &str,
        device_id: &str,
        device_key: &[u8; DEVICE_KEY_LEN],
    ) -> std::result::Result<RegisterFrame, CryptoError>;

    /// Verify and decrypt a handshake acknowledgement.
    fn decrypt_ack(
        &self,
        ack: &AckEnvelope,
        context: &AckContext,
    ) -> std::result::Result<Vec<u8>, CryptoError>;
}

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 fingerprint of public key bytes.
#[must_use]
pub fn fingerprint(public_key: &[u8]) -> String {
    hex::encode(sha256(public_key))
}

/// Compare two fingerprints, ignoring case and `:` separators.
#[must_use]
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let canonical = |s: &str| -> Vec<u8> {
        s.bytes()
            .filter(|b| *b != b':' && !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_lowercase())
            .collect()
    };
    let a = canonical(a);
    let b = canonical(b);
    !a.is_empty() && constant_time_eq(&a, &b)
}

/// Compute xxHash64, used for clipboard change tokens.
pub fn xxhash64(data: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(data, 0)
}

/// Constant-time comparison of two byte slices.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;

    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
