//! Latchkey CLI - pairing links, trust records and clipboard hygiene
//!
//! Latchkey pairs a device with a secret-vault listener on the local network
//! and keeps the resulting trust record in a private store.
//!
//! ## Quick Start
//!
//! ```bash
//! # Inspect a scanned pairing link
//! latchkey decode 'latchkey://pair?v=3&host=10.0.0.5&port=60769&token=...'
//!
//! # Move a pairing from another device
//! latchkey trust import pairing.json --expect 10.0.0.5:60768
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Decode(args) => commands::decode::run(args),
        Command::Trust(args) => commands::trust::run(args, cli.data_dir),
        Command::Copy(args) => commands::copy::run(args).await,
        Command::Config(args) => commands::config::run(args),
        Command::Completions(args) => {
            commands::completions::run(args);
            Ok(())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,latchkey=info,latchkey_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
