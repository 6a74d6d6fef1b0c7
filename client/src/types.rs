//! Public types shared by the client, the reader loop, and the transport.

use std::time::Duration;

use crate::queue::MessageQueue;

/// Bounded wait of one reader iteration.
///
/// Also the worst-case latency for the loop to notice a stop request.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest poll timeout the reader loop runs with.
///
/// A zero wait would turn every idle iteration into an immediate timeout.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Why the response reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// An empty payload arrived on the inbound queue.
    EndOfStream,
    /// The stop signal was observed.
    StopRequested,
    /// The owning client was dropped without asking for a stop.
    StopSenderDropped,
    /// The inbound queue was closed and drained.
    InboundClosed,
}

impl ReaderExit {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::EndOfStream => "end of stream",
            Self::StopRequested => "stop requested",
            Self::StopSenderDropped => "client dropped",
            Self::InboundClosed => "inbound queue closed",
        }
    }
}

/// The outbound/inbound queue pair of one server session.
#[derive(Debug, Clone, Default)]
pub struct SessionQueues {
    /// Serialized requests, client to transport.
    pub outbound: MessageQueue,
    /// Raw responses, transport to reader loop.
    pub inbound: MessageQueue,
}

impl SessionQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub poll_timeout: Duration,
}

impl ClientOptions {
    /// Poll timeout raised to at least [`MIN_POLL_TIMEOUT`].
    #[must_use]
    pub fn effective_poll_timeout(&self) -> Duration {
        self.poll_timeout.max(MIN_POLL_TIMEOUT)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}
