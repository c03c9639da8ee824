//! Copy command implementation.

use std::time::{Duration, Instant};

use anyhow::Result;

use latchkey_core::clipboard::{ClearOutcome, ClipboardBackend, ClipboardTracker, NativeClipboard};

use super::{user_error, CopyArgs};

/// How often ownership is re-checked while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run the copy command.
pub async fn run(args: CopyArgs) -> Result<()> {
    let config = super::load_config();
    let timeout = args.timeout.unwrap_or(config.clipboard.clear_after);

    let backend = NativeClipboard::new().map_err(user_error)?;
    let mut tracker =
        ClipboardTracker::new(backend).with_local_only(config.clipboard.local_only);
    tracker.write(&args.text, Some(timeout)).map_err(user_error)?;

    println!("Copied. Clearing in {}s (Ctrl+C to clear now).", timeout.as_secs());

    let held = tokio::select! {
        outcome = hold(&mut tracker, POLL_INTERVAL) => Some(outcome?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match held {
        Some(outcome) => outcome,
        None => tracker.clear_if_owned_and_unchanged().map_err(user_error)?,
    };

    match outcome {
        ClearOutcome::Cleared => println!("Clipboard cleared."),
        ClearOutcome::Revoked => println!("Clipboard was changed by another app; left untouched."),
        ClearOutcome::NotOwned => println!("Nothing to clear."),
    }
    Ok(())
}

/// Wait until the tracked write expires or is overwritten by someone else.
async fn hold<B: ClipboardBackend>(
    tracker: &mut ClipboardTracker<B>,
    poll: Duration,
) -> Result<ClearOutcome> {
    loop {
        if let Some(outcome) = tracker.expire_if_due(Instant::now()).map_err(user_error)? {
            return Ok(outcome);
        }
        if tracker.discard_if_changed().map_err(user_error)? {
            return Ok(ClearOutcome::Revoked);
        }
        if !tracker.is_owned() {
            return Ok(ClearOutcome::NotOwned);
        }
        tokio::time::sleep(poll).await;
    }
}
