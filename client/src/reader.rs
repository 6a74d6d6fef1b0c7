//! Response reader loop.
//!
//! Drains the inbound queue on a dedicated task, decodes each payload as a
//! UTF-8 JSON document, and hands it to the caller's [`ResponseHandler`].
//!
//! The loop waits on the queue with a bounded timeout so it can look at the
//! stop channel even while the server is silent. The stop channel is only
//! consulted after a pop returns, so a payload dequeued just before a stop
//! request lands may or may not be delivered. Cancellation is best-effort.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::queue::{MessageQueue, PopError};
use crate::signal::{StopPoll, StopReceiver};
use crate::types::ReaderExit;

/// Longest slice of a bad payload quoted in the log.
const PAYLOAD_PREVIEW_CHARS: usize = 256;

/// Receives every decoded response, in dequeue order, on the reader task.
///
/// Implementations must not block for long: the next response is not
/// delivered until `handle` returns.
pub trait ResponseHandler: Send + 'static {
    fn handle(&mut self, response: serde_json::Value);
}

impl<F> ResponseHandler for F
where
    F: FnMut(serde_json::Value) + Send + 'static,
{
    fn handle(&mut self, response: serde_json::Value) {
        self(response);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Decode one inbound payload into a JSON document.
pub fn decode_payload(payload: &[u8]) -> Result<serde_json::Value, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut chars = text.chars();
    let mut preview: String = chars.by_ref().take(PAYLOAD_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        preview.push('…');
    }
    preview
}

fn check_stop(stop_rx: &mut StopReceiver) -> Option<ReaderExit> {
    match stop_rx.poll() {
        StopPoll::Pending => None,
        StopPoll::Requested => Some(ReaderExit::StopRequested),
        StopPoll::Detached => Some(ReaderExit::StopSenderDropped),
    }
}

/// Run the loop until end-of-stream, a stop request, or a closed queue.
///
/// Decode failures are logged and skipped; they never end the loop.
pub async fn run_reader<H: ResponseHandler>(
    inbound: MessageQueue,
    mut stop_rx: StopReceiver,
    mut handler: H,
    poll_timeout: Duration,
) -> ReaderExit {
    loop {
        let payload = match inbound.pop(poll_timeout).await {
            Ok(payload) => payload,
            Err(PopError::Empty) => {
                if let Some(exit) = check_stop(&mut stop_rx) {
                    return exit;
                }
                continue;
            }
            Err(PopError::Closed) => return ReaderExit::InboundClosed,
        };

        if payload.is_empty() {
            tracing::debug!("No data to consume; reader exiting");
            return ReaderExit::EndOfStream;
        }

        if let Some(exit) = check_stop(&mut stop_rx) {
            tracing::debug!(
                bytes = payload.len(),
                "Stop observed; discarding dequeued response"
            );
            return exit;
        }

        match decode_payload(&payload) {
            Ok(response) => {
                tracing::trace!(bytes = payload.len(), "Delivering response");
                handler.handle(response);
            }
            Err(e) => {
                tracing::warn!(
                    payload = %payload_preview(&payload),
                    "Skipping undecodable response: {e}"
                );
            }
        }
    }
}

/// Spawn [`run_reader`] on the current tokio runtime.
pub fn spawn_reader<H: ResponseHandler>(
    inbound: MessageQueue,
    stop_rx: StopReceiver,
    handler: H,
    poll_timeout: Duration,
) -> JoinHandle<ReaderExit> {
    tokio::spawn(async move {
        let exit = run_reader(inbound, stop_rx, handler, poll_timeout).await;
        tracing::info!(reason = exit.label(), "Response reader stopped");
        exit
    })
}
