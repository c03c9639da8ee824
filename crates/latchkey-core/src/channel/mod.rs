//! Command channel client.
//!
//! Each call opens its own connection, sends the routing preamble and one
//! provider-built frame, reads exactly one reply line and closes. Nothing is
//! pooled or reused between calls.
//!
//! ## Approval policy
//!
//! Listeners may require an `approve` before sensitive operations. With
//! `auto_approve` enabled, [`CommandClient::send_with_auto_approve`]:
//!
//! 1. sends `approve` and fails outright unless it succeeds,
//! 2. waits `approve_delay`, then sends the command,
//! 3. on `NEEDS_APPROVE` approves again, waits once more and reissues the
//!    command a single time.
//!
//! No other failure is retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use zeroize::Zeroizing;

use crate::config::ChannelConfig;
use crate::connection;
use crate::crypto::FrameProvider;
use crate::error::{Error, Result};
use crate::protocol::{self, Frame, Operation, Route, ServerResponse, Status};
use crate::trust::TrustRecord;

/// One command-channel operation and its payload.
#[derive(Clone)]
pub struct Command {
    operation: Operation,
    payload: Zeroizing<Vec<u8>>,
}

impl Command {
    /// Deliver a secret.
    pub fn inject(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            operation: Operation::Inject,
            payload: Zeroizing::new(secret.into()),
        }
    }

    /// Pre-approve the next operation.
    #[must_use]
    pub fn approve() -> Self {
        Self::bare(Operation::Approve)
    }

    /// Arm the listener, for `duration` if given (whole seconds).
    #[must_use]
    pub fn arm(duration: Option<Duration>) -> Self {
        let payload = duration
            .map(|d| d.as_secs().to_string().into_bytes())
            .unwrap_or_default();
        Self {
            operation: Operation::Arm,
            payload: Zeroizing::new(payload),
        }
    }

    /// Disarm the listener.
    #[must_use]
    pub fn disarm() -> Self {
        Self::bare(Operation::Disarm)
    }

    fn bare(operation: Operation) -> Self {
        Self {
            operation,
            payload: Zeroizing::new(Vec::new()),
        }
    }

    /// The operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// The payload handed to the frame provider.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("operation", &self.operation)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// How a successful command was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered directly (`OK`)
    Direct,
    /// Delivered through the listener's clipboard (`OK_CLIPBOARD`)
    Clipboard,
}

impl Delivery {
    /// Classify a status, `None` for anything but success.
    #[must_use]
    pub const fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Ok => Some(Self::Direct),
            Status::OkClipboard => Some(Self::Clipboard),
            _ => None,
        }
    }
}

/// Result of [`CommandClient::send_with_auto_approve`].
#[derive(Debug, Clone)]
pub struct Outcome {
    /// How the command was delivered
    pub delivery: Delivery,
    /// The final reply
    pub response: ServerResponse,
    /// Approve calls made on the command's behalf
    pub approvals: u32,
    /// Whether the command was reissued after `NEEDS_APPROVE`
    pub retried: bool,
}

/// Client for a paired listener's command channel.
#[derive(Clone)]
pub struct CommandClient {
    provider: Arc<dyn FrameProvider>,
    config: ChannelConfig,
}

impl CommandClient {
    /// Create a client.
    #[must_use]
    pub fn new(provider: Arc<dyn FrameProvider>, config: ChannelConfig) -> Self {
        Self { provider, config }
    }

    /// The channel settings in use.
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Send one command and return whatever reply the listener gave.
    ///
    /// A reply with a failure status is still `Ok` here; use
    /// [`execute`](Self::execute) to classify it.
    ///
    /// # Errors
    ///
    /// Returns transport errors without a status, protocol errors when the
    /// frame or reply is malformed, and `Error::Crypto` if the provider fails.
    pub async fn call(&self, record: &TrustRecord, command: &Command) -> Result<ServerResponse> {
        let operation = command.operation();
        let stage = operation.as_str();

        let frame = self
            .provider
            .build_frame(record, operation, command.payload())?;
        let frame = Frame::from_provider(frame, stage)?;

        let addr = record.address();
        let stream = connection::open(&addr, self.config.connect_timeout).await?;
        let mut stream = BufReader::new(stream);

        tracing::debug!(
            "Sending {} to {} ({} byte frame)",
            operation,
            addr,
            frame.len()
        );

        protocol::write_preamble(&mut stream, Route::Message).await?;
        protocol::write_all(&mut stream, frame.as_bytes(), stage).await?;

        let line = protocol::read_line_with_timeout(
            &mut stream,
            self.config.max_reply_bytes,
            self.config.read_timeout,
            stage,
        )
        .await?;

        let response = protocol::decode_reply(&line, stage)?;

        tracing::debug!(
            "{} reply from {}: {} (request {})",
            operation,
            addr,
            response.status,
            response.request_id
        );

        Ok(response)
    }

    /// Send one command and classify the reply.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rejected` for any non-success status, plus every
    /// error of [`call`](Self::call).
    pub async fn execute(
        &self,
        record: &TrustRecord,
        command: &Command,
    ) -> Result<(Delivery, ServerResponse)> {
        let response = self.call(record, command).await?;
        match Delivery::from_status(response.status) {
            Some(delivery) => Ok((delivery, response)),
            None => Err(Error::Rejected(Box::new(response))),
        }
    }

    /// Send a command under the approval policy.
    ///
    /// # Errors
    ///
    /// Returns the failed approve's error if pre-approval fails, otherwise
    /// the error of the last attempt.
    pub async fn send_with_auto_approve(
        &self,
        record: &TrustRecord,
        command: &Command,
    ) -> Result<Outcome> {
        let auto_approve =
            self.config.auto_approve && command.operation() != Operation::Approve;
        let mut approvals = 0;

        if auto_approve {
            self.approve_and_wait(record).await?;
            approvals += 1;
        }

        match self.execute(record, command).await {
            Ok((delivery, response)) => {
                tracing::info!("{} delivered ({:?})", command.operation(), delivery);
                Ok(Outcome {
                    delivery,
                    response,
                    approvals,
                    retried: false,
                })
            }
            Err(Error::Rejected(response))
                if auto_approve && response.status == Status::NeedsApprove =>
            {
                tracing::warn!(
                    "{} needs approval (request {}), approving and retrying once",
                    command.operation(),
                    response.request_id
                );

                self.approve_and_wait(record).await?;
                approvals += 1;

                let (delivery, response) = self.execute(record, command).await?;
                tracing::info!(
                    "{} delivered after retry ({:?})",
                    command.operation(),
                    delivery
                );
                Ok(Outcome {
                    delivery,
                    response,
                    approvals,
                    retried: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn approve_and_wait(&self, record: &TrustRecord) -> Result<()> {
        self.execute(record, &Command::approve()).await?;
        tokio::time::sleep(self.config.approve_delay).await;
        Ok(())
    }
}

impl fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
