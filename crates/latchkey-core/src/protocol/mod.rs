//! Latchkey listener wire protocol.
//!
//! Every connection carries exactly one exchange and starts with a routing
//! preamble line naming the logical endpoint.
//!
//! ## Command channel
//!
//! ```text
//! client → listener   "ROUTE msg\n" | frame
//! listener → client   {"version":1,"status":0,"stage":"inject",...}\n
//! ```
//!
//! ## Frame format
//!
//! Frames are built by the [`FrameProvider`](crate::crypto::FrameProvider)
//! and are opaque to this crate apart from their length prefix:
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────┐
//! │ Length (4 bytes)│ Body (Length bytes)          │
//! │  big-endian     │ provider-defined             │
//! └─────────────────┴──────────────────────────────┘
//! ```
//!
//! A prefix that disagrees with the actual body length is a protocol error.
//! Frames are never truncated or padded to fit.
//!
//! ## Replies
//!
//! A reply is one JSON object terminated by `\n`, bounded by
//! `max_reply_bytes`. Reaching the bound or end-of-stream before the
//! delimiter is a protocol error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Prefix of the routing preamble line.
pub const ROUTE_PREFIX: &str = "ROUTE ";

/// Size of the frame length prefix in bytes.
pub const FRAME_PREFIX_SIZE: usize = 4;

/// Maximum frame body size (1 MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Reply record delimiter.
pub const REPLY_DELIMITER: u8 = b'\n';

/// Default bound on a single reply unit (256 KB), applied to every read.
pub const DEFAULT_MAX_REPLY_BYTES: usize = 256 * 1024;

/// Logical endpoint selected by the routing preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Command channel (inject / approve / arm / disarm)
    Message,
    /// Pairing bootstrap channel
    Pairing,
}

impl Route {
    /// Wire name of the endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "msg",
            Self::Pairing => "pair",
        }
    }

    /// The preamble line, including its delimiter.
    #[must_use]
    pub fn preamble(self) -> String {
        format!("{ROUTE_PREFIX}{}\n", self.as_str())
    }
}

/// Command-channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Deliver a secret to the listener
    Inject,
    /// Pre-approve the next operation
    Approve,
    /// Arm the listener, optionally for a bounded duration
    Arm,
    /// Disarm the listener
    Disarm,
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inject => "inject",
            Self::Approve => "approve",
            Self::Arm => "arm",
            Self::Disarm => "disarm",
        }
    }

    /// Reply stage a listener reports for this operation.
    #[must_use]
    pub const fn stage(self) -> Stage {
        match self {
            Self::Inject => Stage::Inject,
            Self::Approve => Stage::Approve,
            Self::Arm => Stage::Arm,
            Self::Disarm => Stage::Disarm,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome codes returned by a listener.
///
/// Unassigned bytes decode to [`Status::Unknown`] rather than failing, so a
/// newer listener can introduce codes without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Status {
    /// Delivered directly
    Ok,
    /// Listener is not armed
    NotArmed,
    /// Operation requires a prior approve
    NeedsApprove,
    /// Listener does not know this device
    NotPaired,
    /// Request was malformed
    BadRequest,
    /// Request timestamp outside the accepted window
    BadTimestamp,
    /// Request was already seen
    Replay,
    /// Too many requests
    RateLimit,
    /// Frame failed authentication or decryption
    CryptoFail,
    /// Succeeded, delivered through the shared clipboard
    OkClipboard,
    /// Listener-side failure
    InternalError,
    /// Unassigned status byte
    Unknown(u8),
}

impl Status {
    /// Decode a status byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x01 => Self::NotArmed,
            0x02 => Self::NeedsApprove,
            0x03 => Self::NotPaired,
            0x04 => Self::BadRequest,
            0x05 => Self::BadTimestamp,
            0x06 => Self::Replay,
            0x07 => Self::RateLimit,
            0x08 => Self::CryptoFail,
            0x09 => Self::OkClipboard,
            0x0A => Self::InternalError,
            other => Self::Unknown(other),
        }
    }

    /// Encode as a status byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::NotArmed => 0x01,
            Self::NeedsApprove => 0x02,
            Self::NotPaired => 0x03,
            Self::BadRequest => 0x04,
            Self::BadTimestamp => 0x05,
            Self::Replay => 0x06,
            Self::RateLimit => 0x07,
            Self::CryptoFail => 0x08,
            Self::OkClipboard => 0x09,
            Self::InternalError => 0x0A,
            Self::Unknown(byte) => byte,
        }
    }

    /// `Ok` and `OkClipboard` are the only successes.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::OkClipboard)
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotArmed => "NOT_ARMED",
            Self::NeedsApprove => "NEEDS_APPROVE",
            Self::NotPaired => "NOT_PAIRED",
            Self::BadRequest => "BAD_REQUEST",
            Self::BadTimestamp => "BAD_TIMESTAMP",
            Self::Replay => "REPLAY",
            Self::RateLimit => "RATE_LIMIT",
            Self::CryptoFail => "CRYPTO_FAIL",
            Self::OkClipboard => "OK_CLIPBOARD",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// User-facing explanation.
    #[must_use]
    pub const fn summary(self) -> &'static str {
        match self {
            Self::Ok => "Delivered.",
            Self::OkClipboard => "Delivered to the listener's clipboard.",
            Self::NotArmed => "The listener is not armed.",
            Self::NeedsApprove => "The listener requires approval first.",
            Self::NotPaired => "This device is no longer paired with the listener.",
            Self::BadRequest => "The listener rejected the request.",
            Self::BadTimestamp => "Device clocks are out of sync with the listener.",
            Self::Replay => "The listener rejected a repeated request.",
            Self::RateLimit => "Too many requests. Wait a moment and try again.",
            Self::CryptoFail => "The listener could not verify this device.",
            Self::InternalError => "The listener hit an internal error.",
            Self::Unknown(_) => "The listener returned an unrecognized status.",
        }
    }
}

impl From<u8> for Status {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.as_byte()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(byte) => write!(f, "UNKNOWN({byte:#04x})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Operation that produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Generic message handling
    Message,
    /// Secret injection
    Inject,
    /// Approval
    Approve,
    /// Arming
    Arm,
    /// Disarming
    Disarm,
    /// A stage this client does not know
    #[serde(other)]
    Unknown,
}

impl Stage {
    /// Wire name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Inject => "inject",
            Self::Approve => "approve",
            Self::Arm => "arm",
            Self::Disarm => "disarm",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded listener reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    /// Reply format version
    #[serde(rename = "version", alias = "v")]
    pub reply_version: u32,
    /// Outcome
    #[serde(alias = "status_byte")]
    pub status: Status,
    /// Operation that produced the reply
    pub stage: Stage,
    /// Machine-readable cause
    #[serde(default)]
    pub reason: String,
    /// Human-readable text
    #[serde(default, alias = "msg")]
    pub message: String,
    /// Correlation id
    #[serde(default)]
    pub request_id: String,
    /// Listener time (unix seconds)
    #[serde(default, alias = "ts")]
    pub timestamp: i64,
}

impl ServerResponse {
    /// Whether the status is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A validated, length-prefixed frame ready to be written.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wrap a body in a length prefix.
    ///
    /// Provider implementations use this to produce frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds [`MAX_FRAME_SIZE`].
    pub fn encode(body: &[u8]) -> Result<Self> {
        if body.len() > MAX_FRAME_SIZE {
            return Err(Error::Protocol {
                stage: "frame",
                reason: format!("frame body too large: {} bytes", body.len()),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let len = body.len() as u32;
        let mut bytes = Vec::with_capacity(FRAME_PREFIX_SIZE + body.len());
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(body);
        Ok(Self { bytes })
    }

    /// Validate bytes handed back by a provider.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the prefix is missing or disagrees with
    /// the number of bytes that follow it.
    pub fn from_provider(bytes: Vec<u8>, stage: &'static str) -> Result<Self> {
        if bytes.len() < FRAME_PREFIX_SIZE {
            return Err(Error::Protocol {
                stage,
                reason: format!("frame too short for length prefix: {} bytes", bytes.len()),
            });
        }

        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let actual = bytes.len() - FRAME_PREFIX_SIZE;

        if declared != actual {
            return Err(Error::Protocol {
                stage,
                reason: format!("frame declares {declared} bytes but carries {actual}"),
            });
        }

        if actual > MAX_FRAME_SIZE {
            return Err(Error::Protocol {
                stage,
                reason: format!("frame body too large: {actual} bytes"),
            });
        }

        Ok(Self { bytes })
    }

    /// Full frame including the prefix.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Body without the prefix.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.bytes[FRAME_PREFIX_SIZE..]
    }

    /// Total length including the prefix.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Consume into raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Encode a value as one JSON line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
    line.push(REPLY_DELIMITER);
    Ok(line)
}

/// Decode a reply line into a [`ServerResponse`].
///
/// # Errors
///
/// Returns `Error::BadReply` with the raw bytes attached if the line is not
/// a well-formed reply.
pub fn decode_reply(line: &[u8], stage: &'static str) -> Result<ServerResponse> {
    let trimmed = trim_line(line);
    if trimmed.is_empty() {
        return Err(Error::BadReply {
            stage,
            reason: "empty reply".to_string(),
            raw: line.to_vec(),
        });
    }

    serde_json::from_slice(trimmed).map_err(|e| Error::BadReply {
        stage,
        reason: e.to_string(),
        raw: line.to_vec(),
    })
}

/// Strip the delimiter and a trailing carriage return.
#[must_use]
pub fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(&[REPLY_DELIMITER]).unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Write the routing preamble.
///
/// # Errors
///
/// Returns `Error::Write` if writing fails.
pub async fn write_preamble<W>(writer: &mut W, route: Route) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(route.preamble().as_bytes())
        .await
        .map_err(|source| Error::Write {
            stage: "preamble",
            source,
        })
}

/// Write raw bytes and flush.
///
/// # Errors
///
/// Returns `Error::Write` if writing fails.
pub async fn write_all<W>(writer: &mut W, bytes: &[u8], stage: &'static str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(bytes)
        .await
        .map_err(|source| Error::Write { stage, source })?;
    writer
        .flush()
        .await
        .map_err(|source| Error::Write { stage, source })
}

/// Read exactly one delimiter-terminated line of at most `max` bytes.
///
/// The returned line still ends with the delimiter.
///
/// # Errors
///
/// Returns `Error::Read` on I/O failure, or `Error::Protocol` if the stream
/// ends or the bound is reached before the delimiter.
pub async fn read_line<R>(reader: &mut R, max: usize, stage: &'static str) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let mut bounded = reader.take(limit);

    bounded
        .read_until(REPLY_DELIMITER, &mut line)
        .await
        .map_err(|source| Error::Read { stage, source })?;

    if line.last() == Some(&REPLY_DELIMITER) && line.len() <= max {
        return Ok(line);
    }

    if line.len() > max {
        return Err(Error::Protocol {
            stage,
            reason: format!("reply exceeds {max} bytes without a delimiter"),
        });
    }

    Err(Error::Protocol {
        stage,
        reason: if line.is_empty() {
            "connection closed without a reply".to_string()
        } else {
            format!(
                "connection closed after {} bytes without a reply delimiter",
                line.len()
            )
        },
    })
}

/// [`read_line`] guarded by a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if no complete line arrives within `duration`,
/// otherwise the errors of [`read_line`].
pub async fn read_line_with_timeout<R>(
    reader: &mut R,
    max: usize,
    duration: Duration,
    stage: &'static str,
) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    timeout(duration, read_line(reader, max, stage))
        .await
        .map_err(|_| Error::Timeout {
            stage,
            after: duration,
        })?
}

/// Read until the peer closes its write side, bounded by `max` bytes.
///
/// # Errors
///
/// Returns `Error::Timeout`, `Error::Read`, or `Error::Protocol` if more
/// than `max` bytes arrive.
pub async fn read_to_end_with_timeout<R>(
    reader: &mut R,
    max: usize,
    duration: Duration,
    stage: &'static str,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        let mut buf = Vec::new();
        let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
        reader
            .take(limit)
            .read_to_end(&mut buf)
            .await
            .map_err(|source| Error::Read { stage, source })?;

        if buf.len() > max {
            return Err(Error::Protocol {
                stage,
                reason: format!("reply exceeds {max} bytes"),
            });
        }
        Ok(buf)
    };

    timeout(duration, read).await.map_err(|_| Error::Timeout {
        stage,
        after: duration,
    })?
}
