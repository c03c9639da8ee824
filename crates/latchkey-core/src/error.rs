//! Error types for Latchkey.
//!
//! Errors fall into five categories:
//!
//! | Category | Variants | Carries a status? |
//! |----------|----------|-------------------|
//! | Validation | `Link`, `TrustBlob`, `AddressMismatch` | no |
//! | Transport | `Connect`, `Write`, `Read`, `Timeout` | no |
//! | Protocol | `Protocol`, `BadReply` | no |
//! | Application | `Rejected` | yes |
//! | Local | `Crypto`, `Store`, `Clipboard`, `Config`, `Serialization`, `Io` | no |
//!
//! Only the single approve-then-retry path in [`crate::channel`] retries
//! automatically. Everything else is surfaced to the caller as-is.

use std::fmt::Write as _;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::link::LinkError;
use crate::protocol::{ServerResponse, Status};
use crate::trust::TrustBlobError;

/// A specialized `Result` type for Latchkey operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input rejected before any network call
    Validation,
    /// Connect, write, read or timeout failure
    Transport,
    /// The peer spoke, but not in the expected format
    Protocol,
    /// A well-formed reply with a non-success status
    Application,
    /// Local collaborators: crypto provider, store, clipboard, config
    Local,
}

/// The main error type for Latchkey.
#[derive(Error, Debug)]
pub enum Error {
    /// Bootstrap link could not be decoded
    #[error("invalid pairing link: {0}")]
    Link(#[from] LinkError),

    /// Trust blob could not be parsed
    #[error("invalid trust record: {0}")]
    TrustBlob(#[from] TrustBlobError),

    /// A trust record names a different listener than the one intended
    #[error("trust record is for {actual}, but pairing was requested with {intended}")]
    AddressMismatch {
        /// Address the user meant to pair with
        intended: String,
        /// Address found in the record
        actual: String,
    },

    /// Connection could not be established
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Target address
        addr: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Writing to the peer failed
    #[error("failed to send {stage}: {source}")]
    Write {
        /// Step that was being written
        stage: &'static str,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Reading from the peer failed
    #[error("failed to read {stage} reply: {source}")]
    Read {
        /// Step whose reply was being read
        stage: &'static str,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// An I/O step did not complete in time
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Step that timed out
        stage: &'static str,
        /// The bound that was exceeded
        after: Duration,
    },

    /// The peer violated the wire protocol
    #[error("protocol error during {stage}: {reason}")]
    Protocol {
        /// Step at which the violation was detected
        stage: &'static str,
        /// What was wrong
        reason: String,
    },

    /// A reply line arrived but could not be decoded
    #[error("malformed {stage} reply: {reason}")]
    BadReply {
        /// Operation whose reply was malformed
        stage: &'static str,
        /// Decoder message
        reason: String,
        /// Raw reply bytes, for diagnostics
        raw: Vec<u8>,
    },

    /// The listener answered with a non-success status
    #[error("{} rejected by listener: {} ({})", .0.stage, .0.status, .0.reason)]
    Rejected(Box<ServerResponse>),

    /// The cryptographic frame provider failed
    #[error("crypto provider error: {0}")]
    Crypto(String),

    /// Secure store access failed
    #[error("secure store error: {0}")]
    Store(String),

    /// Clipboard access failed
    #[error("clipboard error: {0}")]
    Clipboard(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Link(_) | Self::TrustBlob(_) | Self::AddressMismatch { .. } => {
                ErrorCategory::Validation
            }
            Self::Connect { .. } | Self::Write { .. } | Self::Read { .. } | Self::Timeout { .. } => {
                ErrorCategory::Transport
            }
            Self::Protocol { .. } | Self::BadReply { .. } => ErrorCategory::Protocol,
            Self::Rejected(_) => ErrorCategory::Application,
            Self::Crypto(_)
            | Self::Store(_)
            | Self::Clipboard(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorCategory::Local,
        }
    }

    /// The listener status, for application-level failures only.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Rejected(response) => Some(response.status),
            _ => None,
        }
    }

    /// The full reply behind an application-level failure.
    #[must_use]
    pub fn response(&self) -> Option<&ServerResponse> {
        match self {
            Self::Rejected(response) => Some(response),
            _ => None,
        }
    }

    /// Returns whether a user-initiated retry may succeed.
    ///
    /// Transport failures qualify; protocol violations and validation
    /// failures never do.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Write { .. } | Self::Read { .. } | Self::Timeout { .. }
        )
    }

    /// A short message suitable for showing to the user.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Link(LinkError::Expired { .. }) => {
                "This pairing code has expired. Generate a new one on the listener.".to_string()
            }
            Self::Link(_) => "This is not a valid pairing code.".to_string(),
            Self::TrustBlob(_) => "The pairing data could not be read.".to_string(),
            Self::AddressMismatch { intended, .. } => {
                format!("The pairing data does not belong to {intended}.")
            }
            Self::Timeout { .. } => "The listener did not answer in time. Try again.".to_string(),
            Self::Connect { addr, .. } => format!("Could not reach the listener at {addr}."),
            Self::Write { .. } | Self::Read { .. } => {
                "The connection to the listener was interrupted. Try again.".to_string()
            }
            Self::Protocol { .. } | Self::BadReply { .. } => {
                "The listener sent an unexpected response.".to_string()
            }
            Self::Rejected(response) => response.status.summary().to_string(),
            Self::Crypto(_) => "A cryptographic operation failed.".to_string(),
            Self::Store(_) => "The secure store is unavailable.".to_string(),
            Self::Clipboard(_) => "The clipboard is unavailable.".to_string(),
            Self::Config(_) | Self::Serialization(_) | Self::Io(_) => self.to_string(),
        }
    }

    /// Full technical detail, for display on demand.
    #[must_use]
    pub fn details(&self) -> String {
        let mut out = format!("{self}");
        match self {
            Self::Rejected(response) => {
                let _ = write!(
                    out,
                    "\nstatus: {} ({:#04x})\nstage: {}\nreason: {}\nrequest id: {}\nmessage: {}",
                    response.status,
                    response.status.as_byte(),
                    response.stage,
                    response.reason,
                    response.request_id,
                    response.message,
                );
            }
            Self::BadReply { raw, .. } => {
                let _ = write!(out, "\nraw reply: {}", String::from_utf8_lossy(raw));
            }
            Self::Connect { source, .. } | Self::Write { source, .. } | Self::Read { source, .. } => {
                let _ = write!(out, "\ncause: {:?}", source.kind());
            }
            _ => {}
        }
        out
    }
}
