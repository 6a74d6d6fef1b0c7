//! Out-of-band stop channel for the response reader loop.

use tokio::sync::mpsc;

/// Result of a non-blocking stop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPoll {
    /// No stop request is queued.
    Pending,
    /// The stop signal was queued and has now been consumed.
    Requested,
    /// Every [`StopSender`] is gone; nobody is left to ask for a stop.
    Detached,
}

/// Creates a linked sender/receiver pair.
#[must_use]
pub fn stop_channel() -> (StopSender, StopReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StopSender { tx }, StopReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct StopSender {
    tx: mpsc::UnboundedSender<()>,
}

impl StopSender {
    /// Ask the loop to stop at its next check.
    ///
    /// Never blocks. Signalling a loop that already exited is a no-op.
    pub fn signal(&self) {
        if self.tx.send(()).is_err() {
            tracing::trace!("stop requested after the reader loop exited");
        }
    }
}

#[derive(Debug)]
pub struct StopReceiver {
    rx: mpsc::UnboundedReceiver<()>,
}

impl StopReceiver {
    pub fn poll(&mut self) -> StopPoll {
        match self.rx.try_recv() {
            Ok(()) => StopPoll::Requested,
            Err(mpsc::error::TryRecvError::Empty) => StopPoll::Pending,
            Err(mpsc::error::TryRecvError::Disconnected) => StopPoll::Detached,
        }
    }
}
