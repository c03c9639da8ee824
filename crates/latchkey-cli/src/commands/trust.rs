//! Trust command implementation.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use latchkey_core::connection::PeerAddress;
use latchkey_core::trust::{SecureStore, TrustStore};

use super::{user_error, TrustAction, TrustArgs};

/// Run the trust command.
pub fn run(args: TrustArgs, data_dir: Option<PathBuf>) -> Result<()> {
    let config = super::load_config();
    let trust = super::open_trust_store(&config, data_dir)?;
    let mut out = io::stdout().lock();

    match args.action {
        TrustAction::Import { file, expect } => {
            let blob = read_blob(&file)?;
            import(&trust, &blob, &expect, &mut out)
        }
        TrustAction::Export { address } => {
            eprintln!("Warning: the exported blob contains this device's secret key.");
            export(&trust, &address, &mut out)
        }
        TrustAction::List { json } => list(&trust, json, &mut out),
        TrustAction::Remove { address } => reset(&trust, &address, false, &mut out),
        TrustAction::Reset { address, identity } => reset(&trust, &address, identity, &mut out),
        TrustAction::Whoami => {
            let id = trust.device_id().map_err(user_error)?;
            writeln!(out, "{id}")?;
            Ok(())
        }
    }
}

fn parse_address(raw: &str) -> Result<PeerAddress> {
    PeerAddress::parse(raw).with_context(|| format!("Invalid listener address: {raw}"))
}

fn read_blob(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut blob = String::new();
        io::stdin()
            .read_to_string(&mut blob)
            .context("Failed to read trust blob from stdin")?;
        return Ok(blob);
    }
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read trust blob from {}", file.display()))
}

fn import<S: SecureStore>(
    trust: &TrustStore<S>,
    blob: &str,
    expect: &str,
    out: &mut impl Write,
) -> Result<()> {
    let intended = parse_address(expect)?;
    let record = trust.import(blob, &intended).map_err(user_error)?;
    writeln!(
        out,
        "Imported pairing with {} (device {})",
        record.address(),
        record.device_id
    )?;
    Ok(())
}

fn export<S: SecureStore>(trust: &TrustStore<S>, address: &str, out: &mut impl Write) -> Result<()> {
    let addr = parse_address(address)?;
    let Some(blob) = trust
        .export(addr.host(), addr.port())
        .map_err(user_error)?
    else {
        anyhow::bail!("Not paired with {addr}");
    };
    writeln!(out, "{}", blob.as_str())?;
    Ok(())
}

fn list<S: SecureStore>(trust: &TrustStore<S>, json: bool, out: &mut impl Write) -> Result<()> {
    let peers = trust.list().map_err(user_error)?;

    if json {
        let peers: Vec<String> = peers.iter().map(ToString::to_string).collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&peers)?)?;
        return Ok(());
    }

    if peers.is_empty() {
        writeln!(out, "No paired listeners.")?;
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "Paired Listeners:")?;
    writeln!(out, "{}", "─".repeat(40))?;
    for peer in peers {
        writeln!(out, "  {peer}")?;
    }
    writeln!(out, "{}", "─".repeat(40))?;
    Ok(())
}

fn reset<S: SecureStore>(
    trust: &TrustStore<S>,
    address: &str,
    identity: bool,
    out: &mut impl Write,
) -> Result<()> {
    let addr = parse_address(address)?;
    trust
        .reset(addr.host(), addr.port(), identity)
        .map_err(user_error)?;
    writeln!(out, "Removed pairing with {addr}")?;
    if identity {
        writeln!(out, "Device identity reset. Every listener must be paired again.")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::trust::{FileSecureStore, MemorySecureStore};
    use tempfile::TempDir;

    fn blob(peer_addr: &str) -> String {
        serde_json::json!({
            "version": 1,
            "device_id": "device-1",
            "device_key_hex": "cd".repeat(32),
            "peer_addr": peer_addr,
            "peer_public_key_b64": "bGlzdGVuZXIta2V5",
        })
        .to_string()
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_import_list_export() {
        let trust = TrustStore::new(MemorySecureStore::new());
        let mut buf = Vec::new();

        import(&trust, &blob("10.0.0.5:60768"), "10.0.0.5:60768", &mut buf).unwrap();
        list(&trust, true, &mut buf).unwrap();
        export(&trust, "10.0.0.5:60768", &mut buf).unwrap();

        let text = output(buf);
        assert!(text.contains("Imported pairing with 10.0.0.5:60768"));
        assert!(text.contains("\"10.0.0.5:60768\""));
        assert!(text.contains(&"cd".repeat(32)));
    }

    #[test]
    fn test_import_for_other_listener_fails() {
        let dir = TempDir::new().unwrap();
        let trust = TrustStore::new(FileSecureStore::open(dir.path()).unwrap());
        let mut buf = Vec::new();

        let err = import(&trust, &blob("10.0.0.9:60768"), "10.0.0.5:60768", &mut buf).unwrap_err();

        assert!(err.to_string().contains("10.0.0.5:60768"));
        assert!(trust.list().unwrap().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_export_unknown_listener() {
        let trust = TrustStore::new(MemorySecureStore::new());
        let err = export(&trust, "10.0.0.5:60768", &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("Not paired"));
    }

    #[test]
    fn test_remove_then_list_empty() {
        let trust = TrustStore::new(MemorySecureStore::new());
        let mut buf = Vec::new();
        import(&trust, &blob("desk.local:60768"), "desk.local:60768", &mut buf).unwrap();

        reset(&trust, "desk.local:60768", false, &mut buf).unwrap();
        list(&trust, false, &mut buf).unwrap();

        assert!(output(buf).contains("No paired listeners."));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let trust = TrustStore::new(MemorySecureStore::new());
        assert!(reset(&trust, "desk.local", false, &mut Vec::new()).is_err());
    }
}
