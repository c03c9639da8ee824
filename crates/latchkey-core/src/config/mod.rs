//! Configuration management for Latchkey.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/latchkey/config.toml` |
//! | macOS | `~/Library/Application Support/com.latchkey.Latchkey/config.toml` |
//! | Windows | `%APPDATA%\latchkey\Latchkey\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use latchkey_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Read timeout: {:?}", config.channel.read_timeout);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Latchkey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command channel settings
    pub channel: ChannelConfig,
    /// Pairing settings
    pub pairing: PairingConfig,
    /// Clipboard settings
    pub clipboard: ClipboardConfig,
    /// Storage settings
    pub storage: StorageConfig,
}

/// Command channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Time allowed to establish a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Time allowed for the reply to arrive
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Bound on a single reply unit
    pub max_reply_bytes: usize,
    /// Pre-approve every operation and retry once on `NEEDS_APPROVE`
    pub auto_approve: bool,
    /// Pause between an approve and the operation it unlocks
    #[serde(with = "humantime_serde")]
    pub approve_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            max_reply_bytes: crate::protocol::DEFAULT_MAX_REPLY_BYTES,
            auto_approve: true,
            approve_delay: Duration::from_millis(300),
        }
    }
}

/// Pairing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Bound on the whole pairing handshake
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Deep-link scheme accepted by the decoder
    pub scheme: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            scheme: crate::DEFAULT_SCHEME.to_string(),
        }
    }
}

/// Clipboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardConfig {
    /// How long a copied secret stays on the clipboard
    #[serde(with = "humantime_serde")]
    pub clear_after: Duration,
    /// Ask the platform not to sync copied secrets to other devices
    pub local_only: bool,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            clear_after: Duration::from_secs(60),
            local_only: true,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the secure store root
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Render configuration as TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        std::fs::write(&path, self.to_toml()?)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Root directory for persistent data, honoring `storage.data_dir`.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            project_dirs().map_or_else(
                || PathBuf::from(".latchkey"),
                |dirs| dirs.data_dir().to_path_buf(),
            )
        })
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "latchkey", "Latchkey")
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
