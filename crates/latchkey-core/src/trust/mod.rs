//! Trust records for paired listeners.
//!
//! A [`TrustRecord`] holds everything needed to address and authenticate a
//! paired listener. Records live in a [`SecureStore`] keyed only by the
//! listener's normalized `host:port`, never by anything inside the record, so
//! a record cannot be re-keyed to an address the caller did not ask for.
//!
//! ## Store layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `identity:device_id` | shared local device identity (UTF-8) |
//! | `trust:index` | JSON array of paired `host:port` strings |
//! | `trust:v1:<host:port>` | trust blob (JSON) |
//!
//! ## Atomicity
//!
//! [`TrustStore::save`] deletes the old entry and then inserts the new one. A
//! crash or store failure between the two steps leaves the peer unpaired;
//! callers treat `save` as fallible and re-pair in that case. The index is
//! updated after the record and carries the same caveat.

mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::connection::PeerAddress;
use crate::error::{Error, Result};

pub use store::{FileSecureStore, MemorySecureStore, SecureStore};

/// The only trust blob version this client reads or writes.
pub const TRUST_BLOB_VERSION: u32 = 1;

/// Length of the symmetric device key in bytes.
pub const DEVICE_KEY_LEN: usize = 32;

const DEVICE_ID_KEY: &str = "identity:device_id";
const INDEX_KEY: &str = "trust:index";
const RECORD_PREFIX: &str = "trust:v1:";

/// Reasons a trust blob is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrustBlobError {
    /// Not JSON, or a required field is missing
    #[error("malformed trust blob: {0}")]
    Malformed(String),

    /// Blob version is not supported
    #[error("unsupported trust blob version {0}")]
    UnsupportedVersion(u32),

    /// `device_key_hex` contains non-hex characters
    #[error("device key is not valid hex")]
    InvalidHex,

    /// `device_key_hex` does not encode exactly 32 bytes
    #[error("device key must be 64 hex characters, got {hex_chars}")]
    InvalidKeyLength {
        /// Number of hex characters supplied
        hex_chars: usize,
    },

    /// `peer_addr` is not a valid `host:port`
    #[error("invalid peer address '{0}'")]
    InvalidAddress(String),

    /// A required text field is blank
    #[error("field '{0}' is empty")]
    EmptyField(&'static str),
}

/// Credentials for one paired listener.
///
/// The device key is wiped from memory when the record is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TrustRecord {
    /// Shared local device identity
    pub device_id: String,
    /// Symmetric key shared with the listener
    pub device_key: [u8; DEVICE_KEY_LEN],
    /// Listener host (normalized)
    pub peer_host: String,
    /// Listener port
    pub peer_port: u16,
    /// Base64 KEM public key of the listener
    pub peer_public_key: String,
}

impl TrustRecord {
    /// Create a record, normalizing the host.
    #[must_use]
    pub fn new(
        device_id: &str,
        device_key: [u8; DEVICE_KEY_LEN],
        address: &PeerAddress,
        peer_public_key: &str,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_key,
            peer_host: address.host().to_string(),
            peer_port: address.port(),
            peer_public_key: peer_public_key.to_string(),
        }
    }

    /// Address this record was paired with.
    #[must_use]
    pub fn address(&self) -> PeerAddress {
        PeerAddress::new(&self.peer_host, self.peer_port)
    }

    /// Refuse the record unless it names `intended`.
    pub fn ensure_address(&self, intended: &PeerAddress) -> Result<()> {
        let actual = self.address();
        if &actual == intended {
            Ok(())
        } else {
            Err(Error::AddressMismatch {
                intended: intended.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Parse a trust blob.
    pub fn parse(json: &str) -> std::result::Result<Self, TrustBlobError> {
        let blob: TrustBlob =
            serde_json::from_str(json).map_err(|e| TrustBlobError::Malformed(e.to_string()))?;

        if blob.version != TRUST_BLOB_VERSION {
            return Err(TrustBlobError::UnsupportedVersion(blob.version));
        }

        let device_id = blob.device_id.trim();
        if device_id.is_empty() {
            return Err(TrustBlobError::EmptyField("device_id"));
        }

        let device_key = decode_device_key(&blob.device_key_hex)?;

        let address = PeerAddress::parse(&blob.peer_addr)
            .map_err(|_| TrustBlobError::InvalidAddress(blob.peer_addr.trim().to_string()))?;

        let peer_public_key = blob.peer_public_key.trim();
        if peer_public_key.is_empty() {
            return Err(TrustBlobError::EmptyField("peer_public_key"));
        }

        Ok(Self::new(
            device_id,
            *device_key,
            &address,
            peer_public_key,
        ))
    }

    /// Render as a trust blob.
    pub fn to_blob(&self) -> Result<Zeroizing<String>> {
        let blob = TrustBlob {
            version: TRUST_BLOB_VERSION,
            device_id: self.device_id.clone(),
            device_key_hex: hex::encode(self.device_key),
            peer_addr: self.address().to_string(),
            peer_public_key: self.peer_public_key.clone(),
        };
        serde_json::to_string_pretty(&blob)
            .map(Zeroizing::new)
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl fmt::Debug for TrustRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRecord")
            .field("device_id", &self.device_id)
            .field("device_key", &"<redacted>")
            .field("peer_host", &self.peer_host)
            .field("peer_port", &self.peer_port)
            .field("peer_public_key", &self.peer_public_key)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct TrustBlob {
    version: u32,
    device_id: String,
    device_key_hex: String,
    peer_addr: String,
    #[serde(alias = "peer_public_key_b64")]
    peer_public_key: String,
}

fn decode_device_key(
    raw: &str,
) -> std::result::Result<Zeroizing<[u8; DEVICE_KEY_LEN]>, TrustBlobError> {
    let raw = raw.trim();
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TrustBlobError::InvalidHex);
    }
    if raw.len() != DEVICE_KEY_LEN * 2 {
        return Err(TrustBlobError::InvalidKeyLength {
            hex_chars: raw.len(),
        });
    }

    let mut key = Zeroizing::new([0u8; DEVICE_KEY_LEN]);
    hex::decode_to_slice(raw, &mut key[..]).map_err(|_| TrustBlobError::InvalidHex)?;
    Ok(key)
}

/// Trust records persisted in a [`SecureStore`].
#[derive(Debug)]
pub struct TrustStore<S> {
    store: S,
}

impl<S: SecureStore> TrustStore<S> {
    /// Wrap a secure store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Upsert a record under its own address.
    ///
    /// Not atomic: the old entry is deleted before the new one is written.
    pub fn save(&self, record: &TrustRecord) -> Result<()> {
        let address = record.address();
        let key = record_key(&address);
        let blob = record.to_blob()?;

        self.store.delete(&key)?;
        self.store.set(&key, blob.as_bytes())?;

        let entry = address.to_string();
        self.update_index(|index| {
            if !index.contains(&entry) {
                index.push(entry.clone());
            }
        })?;

        tracing::info!("Saved trust record for {}", address);
        Ok(())
    }

    /// Load the record for one listener.
    pub fn load(&self, host: &str, port: u16) -> Result<Option<TrustRecord>> {
        let address = PeerAddress::new(host, port);
        let Some(bytes) = self.store.get(&record_key(&address))? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);

        let json = std::str::from_utf8(&bytes)
            .map_err(|e| TrustBlobError::Malformed(format!("not UTF-8: {e}")))?;
        let record = TrustRecord::parse(json)?;
        record.ensure_address(&address)?;

        Ok(Some(record))
    }

    /// Remove the record for one listener.
    ///
    /// The shared device identity is removed only when
    /// `also_reset_identity` is set, because every paired listener knows this
    /// device by it.
    pub fn reset(&self, host: &str, port: u16, also_reset_identity: bool) -> Result<()> {
        let address = PeerAddress::new(host, port);
        self.store.delete(&record_key(&address))?;

        let entry = address.to_string();
        self.update_index(|index| index.retain(|a| a != &entry))?;

        if also_reset_identity {
            self.store.delete(DEVICE_ID_KEY)?;
            tracing::warn!("Reset local device identity");
        }

        tracing::info!("Removed trust record for {}", address);
        Ok(())
    }

    /// Addresses of every paired listener.
    pub fn list(&self) -> Result<Vec<PeerAddress>> {
        let index = self.read_index()?;
        Ok(index
            .iter()
            .filter_map(|raw| match PeerAddress::parse(raw) {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!("Skipping invalid trust index entry '{}': {}", raw, e);
                    None
                }
            })
            .collect())
    }

    /// The shared local device identity, created on first use.
    ///
    /// An unreadable stored identity is an error, never replaced here. Only
    /// [`TrustStore::reset`] with `also_reset_identity` discards it.
    pub fn device_id(&self) -> Result<String> {
        if let Some(bytes) = self.store.get(DEVICE_ID_KEY)? {
            return String::from_utf8(bytes)
                .ok()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    Error::Store("stored device identity is unreadable".to_string())
                });
        }

        let id = Uuid::new_v4().to_string();
        self.store.set(DEVICE_ID_KEY, id.as_bytes())?;
        tracing::info!("Created device identity {}", id);
        Ok(id)
    }

    /// Parse a blob, check it names `intended`, and persist it.
    ///
    /// Nothing is written if any check fails.
    pub fn import(&self, json: &str, intended: &PeerAddress) -> Result<TrustRecord> {
        let record = TrustRecord::parse(json)?;
        record.ensure_address(intended)?;
        self.save(&record)?;
        Ok(record)
    }

    /// Render the stored record for one listener as a blob.
    pub fn export(&self, host: &str, port: u16) -> Result<Option<Zeroizing<String>>> {
        self.load(host, port)?
            .map(|record| record.to_blob())
            .transpose()
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.store.get(INDEX_KEY)? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Store(format!("trust index is corrupt: {e}"))),
        }
    }

    fn update_index(&self, f: impl FnOnce(&mut Vec<String>)) -> Result<()> {
        let mut index = self.read_index()?;
        f(&mut index);
        let bytes = serde_json::to_vec(&index).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(INDEX_KEY, &bytes)
    }
}

fn record_key(address: &PeerAddress) -> String {
    format!("{RECORD_PREFIX}{address}")
}
