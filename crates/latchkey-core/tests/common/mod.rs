//! Common test utilities for `Latchkey` integration tests.
//!
//! Provides a deterministic frame provider and scripted in-process listeners
//! that record what they received.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use latchkey_core::config::ChannelConfig;
use latchkey_core::connection::PeerAddress;
use latchkey_core::crypto::{
    AckContext, AckEnvelope, CryptoError, FrameProvider, PeerKey, RegisterFrame, AEAD_TAG_LEN,
    ACK_NONCE_LEN,
};
use latchkey_core::protocol::{Frame, Operation};
use latchkey_core::trust::{TrustRecord, DEVICE_KEY_LEN};

/// Tag the test provider appends to every sealed acknowledgement.
pub const ACK_TAG: [u8; AEAD_TAG_LEN] = [0xAA; AEAD_TAG_LEN];

/// Public key bytes the scripted pairing listener advertises.
pub const LISTENER_PUBLIC_KEY: &[u8] = b"listener-kem-public-key";

/// Frame provider with readable, deterministic frames.
///
/// Command frame bodies are `"<op>:<device_id>:<hex payload>"`; register
/// frame bodies are `"register:<key_id>:<token>:<device_id>:<hex device key>"`.
#[derive(Debug, Default)]
pub struct TestProvider {
    /// Emit frames whose length prefix is off by one
    pub corrupt_prefix: bool,
}

impl FrameProvider for TestProvider {
    fn build_frame(
        &self,
        record: &TrustRecord,
        operation: Operation,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let body = format!(
            "{}:{}:{}",
            operation.as_str(),
            record.device_id,
            hex::encode(payload)
        );
        let mut bytes = Frame::encode(body.as_bytes())
            .map_err(|e| CryptoError::new(e.to_string()))?
            .into_bytes();
        if self.corrupt_prefix {
            bytes.push(0);
        }
        Ok(bytes)
    }

    fn build_register_frame(
        &self,
        peer_key: &PeerKey,
        token: &str,
        device_id: &str,
        device_key: &[u8; DEVICE_KEY_LEN],
    ) -> Result<RegisterFrame, CryptoError> {
        let body = format!(
            "register:{}:{}:{}:{}",
            peer_key.key_id,
            token,
            device_id,
            hex::encode(device_key)
        );
        let frame = Frame::encode(body.as_bytes())
            .map_err(|e| CryptoError::new(e.to_string()))?
            .into_bytes();
        Ok(RegisterFrame {
            frame,
            context: AckContext::new(device_key.to_vec()),
        })
    }

    fn decrypt_ack(&self, ack: &AckEnvelope, context: &AckContext) -> Result<Vec<u8>, CryptoError> {
        if context.as_bytes().len() != DEVICE_KEY_LEN {
            return Err(CryptoError::new("missing handshake context"));
        }
        let Some(plaintext) = ack.ciphertext.strip_suffix(&ACK_TAG) else {
            return Err(CryptoError::new("acknowledgement failed authentication"));
        };
        Ok(plaintext.to_vec())
    }
}

/// Seal `plaintext` the way [`TestProvider::decrypt_ack`] expects.
pub fn seal_ack(plaintext: &[u8]) -> Vec<u8> {
    let mut ack = vec![0x07; ACK_NONCE_LEN];
    ack.extend_from_slice(plaintext);
    ack.extend_from_slice(&ACK_TAG);
    ack
}

/// Channel settings with short, test-friendly timings.
pub fn channel_config(auto_approve: bool) -> ChannelConfig {
    ChannelConfig {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        auto_approve,
        approve_delay: Duration::from_millis(20),
        ..ChannelConfig::default()
    }
}

/// A trust record pointing at a local listener.
pub fn trust_record(addr: SocketAddr) -> TrustRecord {
    TrustRecord::new(
        "device-1",
        [0x11; DEVICE_KEY_LEN],
        &PeerAddress::new("127.0.0.1", addr.port()),
        &BASE64_STANDARD.encode(LISTENER_PUBLIC_KEY),
    )
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// One JSON reply line.
pub fn reply_line(status: u8, stage: &str, request_id: &str) -> Vec<u8> {
    let mut line = serde_json::to_vec(&serde_json::json!({
        "version": 1,
        "status": status,
        "stage": stage,
        "reason": if status == 0 { "" } else { "scripted" },
        "message": "",
        "timestamp": 1_700_000_000,
        "request_id": request_id,
    }))
    .unwrap();
    line.push(b'\n');
    line
}

/// What the command listener does after reading a frame.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write these bytes, then close
    Reply(Vec<u8>),
    /// Keep the connection open without answering
    Hang,
}

/// One frame seen by a command listener.
#[derive(Debug, Clone)]
pub struct Received {
    /// Routing preamble, without its delimiter
    pub route: String,
    /// Operation named in the frame
    pub operation: String,
    /// Device id named in the frame
    pub device_id: String,
    /// Hex payload named in the frame
    pub payload_hex: String,
}

/// Command listener that answers each connection from a script.
pub struct ScriptedListener {
    /// Address to dial
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    handle: JoinHandle<()>,
}

impl ScriptedListener {
    /// Start a listener that serves one connection per script entry.
    pub async fn start(script: Vec<Script>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            for step in script {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut stream = BufReader::new(stream);

                let mut route = String::new();
                if stream.read_line(&mut route).await.is_err() {
                    continue;
                }

                let mut len = [0u8; 4];
                if stream.read_exact(&mut len).await.is_err() {
                    continue;
                }
                let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
                if stream.read_exact(&mut body).await.is_err() {
                    continue;
                }

                let body = String::from_utf8_lossy(&body).to_string();
                let mut parts = body.splitn(3, ':');
                seen.lock().unwrap().push(Received {
                    route: route.trim_end().to_string(),
                    operation: parts.next().unwrap_or_default().to_string(),
                    device_id: parts.next().unwrap_or_default().to_string(),
                    payload_hex: parts.next().unwrap_or_default().to_string(),
                });

                match step {
                    Script::Reply(bytes) => {
                        let _ = stream.write_all(&bytes).await;
                        let _ = stream.shutdown().await;
                    }
                    Script::Hang => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            }
        });

        Self {
            addr,
            received,
            handle,
        }
    }

    /// Every frame received so far.
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Operations received so far, in order.
    pub fn operations(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.operation).collect()
    }
}

impl Drop for ScriptedListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A `peer_key` reply line.
pub fn peer_key_line(version: u32, expires_at: i64, fingerprint: Option<&str>) -> Vec<u8> {
    let mut value = serde_json::json!({
        "operation": "peer_key",
        "version": version,
        "key_id": "listener-key-1",
        "public_key_b64": BASE64_STANDARD.encode(LISTENER_PUBLIC_KEY),
        "expires_at": expires_at,
    });
    if let Some(fp) = fingerprint {
        value["fingerprint"] = serde_json::Value::String(fp.to_string());
    }
    let mut line = serde_json::to_vec(&value).unwrap();
    line.push(b'\n');
    line
}

/// How the pairing listener behaves.
#[derive(Debug, Clone)]
pub struct PairingScript {
    /// Line sent in answer to hello
    pub peer_key_line: Vec<u8>,
    /// Bytes sent after the register frame
    pub ack: Vec<u8>,
    /// Stop answering after the hello
    pub hang_after_hello: bool,
}

/// What the pairing listener saw.
#[derive(Debug, Clone, Default)]
pub struct PairingSeen {
    /// Routing preamble, without its delimiter
    pub route: String,
    /// Decoded hello message
    pub hello: serde_json::Value,
    /// Everything sent after the peer key, up to the client's half-close
    pub register: Vec<u8>,
}

/// Start a pairing listener that serves a single handshake.
pub async fn pairing_listener(script: PairingScript) -> (SocketAddr, JoinHandle<PairingSeen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut seen = PairingSeen::default();
        let Ok((stream, _)) = listener.accept().await else {
            return seen;
        };
        let mut stream = BufReader::new(stream);

        let mut route = String::new();
        let _ = stream.read_line(&mut route).await;
        seen.route = route.trim_end().to_string();

        let mut hello = String::new();
        let _ = stream.read_line(&mut hello).await;
        seen.hello = serde_json::from_str(hello.trim_end()).unwrap_or_default();

        if script.hang_after_hello {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return seen;
        }

        let _ = stream.write_all(&script.peer_key_line).await;
        let _ = stream.flush().await;

        let _ = stream.read_to_end(&mut seen.register).await;

        let _ = stream.write_all(&script.ack).await;
        let _ = stream.shutdown().await;
        seen
    });

    (addr, handle)
}
