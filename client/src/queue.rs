//! Shared FIFO of opaque byte payloads.
//!
//! A session uses two independent queues: outbound (requests headed for the
//! server) and inbound (responses headed for the reader loop). Every clone of
//! a [`MessageQueue`] refers to the same FIFO, so the client and its
//! transport can both hold one without either owning it.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message queue is closed")]
pub struct QueueClosed;

/// Why a pop returned no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    /// Nothing arrived within the wait. The normal idle condition.
    #[error("message queue is empty")]
    Empty,
    /// The queue was closed and every queued payload has been taken.
    #[error("message queue is closed")]
    Closed,
}

/// Unbounded, thread-safe FIFO of byte payloads.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    /// `None` once closed. Taking the only sender is what closes the channel.
    tx: Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Arc::new(std::sync::Mutex::new(Some(tx))),
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a payload without waiting.
    pub fn push(&self, payload: Vec<u8>) -> Result<(), QueueClosed> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| QueueClosed),
            None => Err(QueueClosed),
        }
    }

    /// Wait at most `timeout` for the next payload.
    pub async fn pop(&self, timeout: Duration) -> Result<Vec<u8>, PopError> {
        let recv = async { self.rx.lock().await.recv().await };
        match tokio::time::timeout(timeout, recv).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(PopError::Closed),
            Err(_) => Err(PopError::Empty),
        }
    }

    /// Wait for the next payload with no deadline.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    /// Take the next payload if one is immediately available.
    ///
    /// Reports `Empty` while another task is parked in [`pop`](Self::pop)
    /// or [`recv`](Self::recv) on the same queue.
    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Err(PopError::Empty);
        };
        match rx.try_recv() {
            Ok(payload) => Ok(payload),
            Err(mpsc::error::TryRecvError::Empty) => Err(PopError::Empty),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(PopError::Closed),
        }
    }

    /// Refuse further pushes. Payloads already queued can still be popped.
    pub fn close(&self) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            tracing::trace!("message queue closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
