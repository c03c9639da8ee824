//! # Latchkey Core Library
//!
//! `latchkey-core` is the pairing and command-channel client behind the
//! Latchkey secret vault. It pairs with a remote listener from a scanned
//! link, keeps the resulting credentials in a secure store, and sends
//! authenticated commands that deliver secrets to the paired machine.
//!
//! ## Features
//!
//! - **Link bootstrap**: QR / deep-link decoding with expiry and version checks
//! - **Pinned pairing**: Peer keys checked against the fingerprint in the link
//! - **Opaque crypto**: All KEM/AEAD work behind a [`crypto::FrameProvider`]
//! - **Approval aware**: One bounded approve-then-retry cycle, never more
//! - **Clipboard hygiene**: Secrets are only cleared while still ours
//!
//! ## Modules
//!
//! - [`channel`] - Command channel client (inject / approve / arm / disarm)
//! - [`clipboard`] - Clipboard ownership tracking and backends
//! - [`config`] - Configuration management
//! - [`connection`] - Listener addressing and connection setup
//! - [`crypto`] - Frame provider interface and hashing helpers
//! - [`link`] - Bootstrap link decoding
//! - [`pairing`] - Pairing handshake client
//! - [`protocol`] - Wire protocol: routing, frames, replies, status codes
//! - [`trust`] - Trust records and secure keyed storage
//!
//! ## Example
//!
//! ```rust,ignore
//! use latchkey_core::{channel::{Command, CommandClient}, link::BootstrapLink};
//!
//! let link = BootstrapLink::decode(scanned)?;
//! let record = pairing.pair_and_save(&link, &link.address(), &trust).await?;
//!
//! let client = CommandClient::new(provider, config.channel.clone());
//! let outcome = client.send_with_auto_approve(&record, &Command::inject(secret)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod channel;
pub mod clipboard;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod link;
pub mod pairing;
pub mod protocol;
pub mod trust;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deep-link scheme used when none is configured
pub const DEFAULT_SCHEME: &str = "latchkey";
