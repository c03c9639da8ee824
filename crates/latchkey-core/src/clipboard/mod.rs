//! Clipboard ownership tracking.
//!
//! When a secret is copied, the tracker remembers that this process was the
//! last writer and snapshots the clipboard's change token. Clearing later is
//! only allowed while that snapshot still matches: if anything else has
//! written to the clipboard since, ownership is dropped and the user's data
//! is left alone.
//!
//! ```rust,ignore
//! use latchkey_core::clipboard::{ClipboardTracker, NativeClipboard};
//!
//! let mut tracker = ClipboardTracker::new(NativeClipboard::new()?);
//! tracker.write("s3cret", Some(Duration::from_secs(60)))?;
//! // ... later, on a timer or when the app goes to the background
//! tracker.clear_if_owned_and_unchanged()?;
//! ```

mod access;

use std::time::{Duration, Instant};

use crate::error::Result;

pub use access::{ChangeToken, ClipboardBackend, MemoryClipboard, NativeClipboard, WriteOptions};

/// What this process knows about its last clipboard write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OwnershipState {
    /// Whether this process is still the last writer
    pub owned: bool,
    /// Change token right after the write
    pub owned_change_token: Option<ChangeToken>,
    /// When the write should be cleared
    pub expires_at: Option<Instant>,
}

/// Result of a conditional clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Contents were ours and have been cleared
    Cleared,
    /// Nothing was owned
    NotOwned,
    /// Someone else wrote since; ownership dropped, contents untouched
    Revoked,
}

/// Tracks ownership of a shared clipboard.
#[derive(Debug)]
pub struct ClipboardTracker<B> {
    backend: B,
    state: OwnershipState,
    local_only: bool,
}

impl<B: ClipboardBackend> ClipboardTracker<B> {
    /// Create a tracker that owns nothing yet.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: OwnershipState::default(),
            local_only: true,
        }
    }

    /// Set whether writes are marked local-only.
    #[must_use]
    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Current ownership state.
    pub const fn state(&self) -> OwnershipState {
        self.state
    }

    /// Whether this process is still the last writer, as far as it knows.
    pub const fn is_owned(&self) -> bool {
        self.state.owned
    }

    /// The wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The wrapped backend, mutably.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Write `value` and take ownership.
    ///
    /// `timeout` is forwarded to the platform as an expiry hint and recorded
    /// for [`expire_if_due`](Self::expire_if_due).
    pub fn write(&mut self, value: &str, timeout: Option<Duration>) -> Result<()> {
        let options = WriteOptions {
            local_only: self.local_only,
            expires_in: timeout,
        };
        self.backend.write_text(value, &options)?;
        let token = self.backend.change_token()?;

        self.state = OwnershipState {
            owned: true,
            owned_change_token: Some(token),
            expires_at: timeout.map(|t| Instant::now() + t),
        };
        tracing::debug!("Clipboard: took ownership ({} bytes)", value.len());
        Ok(())
    }

    /// Clear the clipboard only if this process still owns it unchanged.
    pub fn clear_if_owned_and_unchanged(&mut self) -> Result<ClearOutcome> {
        if !self.state.owned {
            return Ok(ClearOutcome::NotOwned);
        }

        let current = self.backend.change_token()?;
        if Some(current) != self.state.owned_change_token {
            tracing::info!("Clipboard changed since our write, leaving it untouched");
            self.state = OwnershipState::default();
            return Ok(ClearOutcome::Revoked);
        }

        self.backend.clear()?;
        self.state = OwnershipState::default();
        tracing::debug!("Clipboard: cleared");
        Ok(ClearOutcome::Cleared)
    }

    /// Drop ownership if the clipboard changed, without touching it.
    ///
    /// Returns whether ownership was dropped.
    pub fn discard_if_changed(&mut self) -> Result<bool> {
        if !self.state.owned {
            return Ok(false);
        }

        let current = self.backend.change_token()?;
        if Some(current) == self.state.owned_change_token {
            return Ok(false);
        }

        self.state = OwnershipState::default();
        tracing::debug!("Clipboard: dropped stale ownership");
        Ok(true)
    }

    /// Empty the clipboard regardless of ownership.
    pub fn force_clear(&mut self) -> Result<()> {
        self.backend.clear()?;
        self.state = OwnershipState::default();
        Ok(())
    }

    /// Run [`clear_if_owned_and_unchanged`](Self::clear_if_owned_and_unchanged)
    /// once the write's timeout has elapsed at `now`.
    ///
    /// Returns `None` while the write is not yet due.
    pub fn expire_if_due(&mut self, now: Instant) -> Result<Option<ClearOutcome>> {
        match self.state.expires_at {
            Some(deadline) if self.state.owned && now >= deadline => {
                self.clear_if_owned_and_unchanged().map(Some)
            }
            _ => Ok(None),
        }
    }
}
