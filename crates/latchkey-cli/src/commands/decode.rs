//! Decode command implementation.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use latchkey_core::link::{BootstrapLink, LinkDecoder};
use latchkey_core::Error;

use super::{user_error, DecodeArgs};

/// Run the decode command.
pub fn run(args: DecodeArgs) -> Result<()> {
    let config = super::load_config();
    let scheme = args.scheme.unwrap_or(config.pairing.scheme);
    let decoder = LinkDecoder::new(&scheme);
    let link = decoder
        .decode(&args.link)
        .map_err(|e| user_error(Error::from(e)))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&link))?);
        return Ok(());
    }
    if args.uri {
        println!("{}", link.to_uri(decoder.scheme()));
        return Ok(());
    }

    println!();
    println!("Pairing Link");
    println!("{}", "─".repeat(40));
    println!("  Listener:     {}", link.address());
    println!("  Version:      {}", link.version);
    println!("  Token:        {} characters", link.token.len());
    match &link.fingerprint {
        Some(fp) => println!("  Fingerprint:  {fp}"),
        None => println!("  Fingerprint:  (not pinned)"),
    }
    match link.expires_at.and_then(|exp| Utc.timestamp_opt(exp, 0).single()) {
        Some(at) => println!("  Expires:      {}", at.to_rfc3339()),
        None => println!("  Expires:      never"),
    }
    println!();

    Ok(())
}

/// Describe a link without exposing its token.
fn to_json(link: &BootstrapLink) -> serde_json::Value {
    serde_json::json!({
        "version": link.version,
        "host": link.host,
        "port": link.port,
        "address": link.address().to_string(),
        "token_len": link.token.len(),
        "fingerprint": link.fingerprint,
        "expires_at": link.expires_at,
    })
}
