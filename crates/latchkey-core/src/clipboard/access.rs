//! Clipboard backends.

use std::time::Duration;

use arboard::{Clipboard, Set};

use crate::crypto;
use crate::error::{Error, Result};

/// Opaque version marker of the clipboard contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeToken(pub u64);

/// Hints passed along with a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Keep the value off synced or cloud clipboards
    pub local_only: bool,
    /// Ask the platform to expire the value after this long
    pub expires_in: Option<Duration>,
}

/// Platform-agnostic clipboard access trait.
pub trait ClipboardBackend: Send {
    /// Replace the clipboard with `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if clipboard access fails.
    fn write_text(&mut self, text: &str, options: &WriteOptions) -> Result<()>;

    /// Current change token.
    ///
    /// # Errors
    ///
    /// Returns an error if the clipboard cannot be inspected at all.
    fn change_token(&mut self) -> Result<ChangeToken>;

    /// Empty the clipboard.
    ///
    /// # Errors
    ///
    /// Returns an error if clipboard access fails.
    fn clear(&mut self) -> Result<()>;
}

/// Native clipboard implementation using arboard.
///
/// Desktop clipboards expose no change counter, so the token is the
/// xxHash64 of the current text, or 0 when the clipboard is empty or holds
/// something other than text.
pub struct NativeClipboard {
    clipboard: Clipboard,
}

impl NativeClipboard {
    /// Create a new native clipboard accessor.
    ///
    /// # Errors
    ///
    /// Returns an error if clipboard cannot be accessed.
    pub fn new() -> Result<Self> {
        let clipboard = Clipboard::new()
            .map_err(|e| Error::Clipboard(format!("failed to access clipboard: {e}")))?;
        Ok(Self { clipboard })
    }
}

impl ClipboardBackend for NativeClipboard {
    fn write_text(&mut self, text: &str, options: &WriteOptions) -> Result<()> {
        let set = self.clipboard.set();
        let set = if options.local_only {
            exclude_from_history(set)
        } else {
            set
        };
        if let Some(after) = options.expires_in {
            tracing::trace!("Clipboard: platform expiry of {:?} not supported", after);
        }
        set.text(text.to_string())
            .map_err(|e| Error::Clipboard(format!("failed to set text: {e}")))?;
        tracing::trace!("Clipboard: wrote {} bytes of text", text.len());
        Ok(())
    }

    fn change_token(&mut self) -> Result<ChangeToken> {
        let hash = match self.clipboard.get_text() {
            Ok(text) if !text.is_empty() => crypto::xxhash64(text.as_bytes()),
            Ok(_) => 0,
            Err(e) => {
                tracing::debug!("Clipboard: failed to read text: {}", e);
                0
            }
        };
        Ok(ChangeToken(hash))
    }

    fn clear(&mut self) -> Result<()> {
        self.clipboard
            .clear()
            .map_err(|e| Error::Clipboard(format!("failed to clear clipboard: {e}")))
    }
}

/// Keep the value out of clipboard managers and cloud sync.
#[cfg(target_os = "linux")]
fn exclude_from_history(set: Set<'_>) -> Set<'_> {
    use arboard::SetExtLinux;

    set.exclude_from_history()
}

#[cfg(target_os = "macos")]
fn exclude_from_history(set: Set<'_>) -> Set<'_> {
    use arboard::SetExtApple;

    set.exclude_from_history()
}

#[cfg(windows)]
fn exclude_from_history(set: Set<'_>) -> Set<'_> {
    use arboard::SetExtWindows;

    set.exclude_from_history().exclude_from_cloud()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn exclude_from_history(set: Set<'_>) -> Set<'_> {
    tracing::trace!("Clipboard: no history exclusion on this platform");
    set
}

/// In-memory clipboard with a change counter.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: String,
    counter: u64,
    last_options: Option<WriteOptions>,
}

impl MemoryClipboard {
    /// Create an empty clipboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Options of the most recent [`ClipboardBackend::write_text`].
    #[must_use]
    pub const fn last_options(&self) -> Option<WriteOptions> {
        self.last_options
    }

    /// Simulate another application writing to the clipboard.
    pub fn set_external(&mut self, text: &str) {
        self.text = text.to_string();
        self.counter += 1;
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn write_text(&mut self, text: &str, options: &WriteOptions) -> Result<()> {
        self.text = text.to_string();
        self.counter += 1;
        self.last_options = Some(*options);
        Ok(())
    }

    fn change_token(&mut self) -> Result<ChangeToken> {
        Ok(ChangeToken(self.counter))
    }

    fn clear(&mut self) -> Result<()> {
        self.text.clear();
        self.counter += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ClipboardTracker;

    #[test]
    fn test_memory_clipboard_counter() {
        let mut clip = MemoryClipboard::new();
        let start = clip.change_token().unwrap();

        clip.write_text("a", &WriteOptions::default()).unwrap();
        let after_write = clip.change_token().unwrap();
        assert_ne!(start, after_write);

        clip.write_text("a", &WriteOptions::default()).unwrap();
        assert_ne!(after_write, clip.change_token().unwrap());
    }

    #[test]
    fn test_memory_clipboard_external_and_clear() {
        let mut clip = MemoryClipboard::new();
        clip.set_external("other app");
        assert_eq!(clip.text(), "other app");
        clip.clear().unwrap();
        assert!(clip.text().is_empty());
    }

    #[test]
    #[ignore = "requires display server"]
    fn test_native_clipboard_roundtrip() {
        let mut clip = NativeClipboard::new().unwrap();
        clip.write_text("latchkey-test", &WriteOptions::default())
            .unwrap();
        assert_eq!(
            clip.change_token().unwrap(),
            ChangeToken(crypto::xxhash64(b"latchkey-test"))
        );
        clip.clear().unwrap();
    }

    #[test]
    #[ignore = "requires display server"]
    fn test_native_clipboard_local_only_write() {
        let mut tracker =
            ClipboardTracker::new(NativeClipboard::new().unwrap()).with_local_only(true);
        tracker.write("latchkey-private", None).unwrap();

        assert_eq!(
            tracker.backend_mut().change_token().unwrap(),
            ChangeToken(crypto::xxhash64(b"latchkey-private"))
        );
        assert!(tracker.is_owned());
        assert!(!tracker.discard_if_changed().unwrap());
        tracker.force_clear().unwrap();
    }
}
