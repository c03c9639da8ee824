//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use latchkey_core::config::Config;
use latchkey_core::trust::{FileSecureStore, TrustStore};
use latchkey_core::Error;

pub mod completions;
pub mod config;
pub mod copy;
pub mod decode;
pub mod trust;

/// Load configuration with graceful fallback to defaults.
///
/// A broken config file is reported once and then ignored, so commands keep
/// working with default settings.
pub fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{}. Using defaults.", e);
            Config::default()
        }
    }
}

/// Open the trust store under the configured (or overridden) data directory.
pub fn open_trust_store(
    config: &Config,
    data_dir: Option<PathBuf>,
) -> Result<TrustStore<FileSecureStore>> {
    let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
    let store = FileSecureStore::open(&data_dir)
        .with_context(|| format!("Failed to open secure store in {}", data_dir.display()))?;
    Ok(TrustStore::new(store))
}

/// Convert a core error into one that leads with the user-facing summary.
///
/// The technical detail is kept as the cause, so `{:#}` and `{:?}` still
/// show it.
pub fn user_error(err: Error) -> anyhow::Error {
    let summary = err.summary();
    anyhow::anyhow!(err.details()).context(summary)
}

/// Parse a human-readable duration such as `30s`, `5m` or `1h`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3600)
    } else {
        (s, 1)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_secs(n * multiplier))
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 30s, 5m, 1h)"))
}

/// Latchkey - pair with listeners and manage trusted credentials
#[derive(Parser)]
#[command(name = "latchkey")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Override the secure store directory
    #[arg(long, global = true, env = "LATCHKEY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Decode and validate a pairing link
    Decode(DecodeArgs),

    /// Manage trusted listeners
    Trust(TrustArgs),

    /// Copy text to the clipboard and clear it after a timeout
    Copy(CopyArgs),

    /// Show configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the decode command
#[derive(Parser)]
pub struct DecodeArgs {
    /// Link as scanned or pasted (e.g. latchkey://pair?...)
    pub link: String,

    /// Accept a different deep-link scheme
    #[arg(long)]
    pub scheme: Option<String>,

    /// Output as JSON
    #[arg(long, conflicts_with = "uri")]
    pub json: bool,

    /// Print the normalized link instead of a summary (includes the token)
    #[arg(long)]
    pub uri: bool,
}

/// Arguments for the trust command
#[derive(Parser)]
pub struct TrustArgs {
    /// Trust subcommand
    #[command(subcommand)]
    pub action: TrustAction,
}

/// Trust subcommands
#[derive(Subcommand)]
pub enum TrustAction {
    /// Import a trust blob for a listener
    Import {
        /// Path to the blob, or - for stdin
        file: PathBuf,

        /// Listener the blob must belong to (host:port)
        #[arg(long)]
        expect: String,
    },

    /// Print the trust blob for a listener
    Export {
        /// Listener address (host:port)
        address: String,
    },

    /// List paired listeners
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Unpair a listener
    Remove {
        /// Listener address (host:port)
        address: String,
    },

    /// Reset pairing with a listener
    Reset {
        /// Listener address (host:port)
        address: String,

        /// Also reset this device's identity for every listener
        #[arg(long)]
        identity: bool,
    },

    /// Show this device's identity
    Whoami,
}

/// Arguments for the copy command
#[derive(Parser)]
pub struct CopyArgs {
    /// Text to copy
    pub text: String,

    /// Clear the clipboard after this long (default from config)
    #[arg(short, long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Overwrite the configuration file with defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: ShellType,
}

/// Supported shells
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ShellType {
    /// Bash
    Bash,
    /// Zsh
    Zsh,
    /// Fish
    Fish,
    /// PowerShell
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish
    Elvish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_trust_reset() {
        let cli = Cli::try_parse_from(["latchkey", "trust", "reset", "10.0.0.5:60768", "--identity"])
            .unwrap();
        match cli.command {
            Command::Trust(TrustArgs {
                action: TrustAction::Reset { address, identity },
            }) => {
                assert_eq!(address, "10.0.0.5:60768");
                assert!(identity);
            }
            _ => panic!("expected trust reset"),
        }
    }

    #[test]
    fn test_decode_json_and_uri_conflict() {
        let link = "latchkey://pair?token=t&addr=h:1";
        assert!(Cli::try_parse_from(["latchkey", "decode", link, "--json", "--uri"]).is_err());

        let cli = Cli::try_parse_from(["latchkey", "decode", link, "--uri"]).unwrap();
        assert!(matches!(cli.command, Command::Decode(DecodeArgs { uri: true, .. })));
    }
}
