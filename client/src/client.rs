//! Client facade, the only type callers talk to.
//!
//! Construction IS initialization: [`Client::start`] spawns the response
//! reader before returning, so a live `Client` always has exactly one reader
//! task draining its inbound queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use crate::queue::{MessageQueue, QueueClosed};
use crate::reader::{ResponseHandler, spawn_reader};
use crate::server::ServerHandle;
use crate::signal::{StopSender, stop_channel};
use crate::types::{ClientOptions, ReaderExit, SessionQueues};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("outbound queue rejected the request: {0}")]
    QueueClosed(#[from] QueueClosed),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("response reader task failed: {0}")]
    ReaderFailed(#[from] JoinError),
}

/// Fire-and-forget client for one server session.
///
/// Requests go out through [`submit`](Self::submit); responses come back
/// through the handler given to [`start`](Self::start). Nothing correlates
/// the two.
pub struct Client<S: ServerHandle> {
    server: S,
    outbound: MessageQueue,
    stop_tx: StopSender,
    reader: JoinHandle<ReaderExit>,
    poll_timeout: Duration,
    /// Responses handed to the handler so far.
    delivered: Arc<AtomicU64>,
}

impl<S: ServerHandle> Client<S> {
    /// Spawn the response reader and return the client.
    ///
    /// A poll timeout below [`MIN_POLL_TIMEOUT`](crate::MIN_POLL_TIMEOUT) is
    /// raised to it. Must be called from within a tokio runtime.
    pub fn start<H: ResponseHandler>(
        server: S,
        queues: &SessionQueues,
        mut handler: H,
        options: ClientOptions,
    ) -> Self {
        let poll_timeout = options.effective_poll_timeout();
        if poll_timeout != options.poll_timeout {
            tracing::warn!(
                requested_ms = options.poll_timeout.as_millis() as u64,
                poll_timeout_ms = poll_timeout.as_millis() as u64,
                "Poll timeout too small; raised to the minimum"
            );
        }

        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);
        let counting_handler = move |response: serde_json::Value| {
            counter.fetch_add(1, Ordering::Relaxed);
            handler.handle(response);
        };

        let (stop_tx, stop_rx) = stop_channel();
        let reader = spawn_reader(
            queues.inbound.clone(),
            stop_rx,
            counting_handler,
            poll_timeout,
        );
        tracing::debug!(
            poll_timeout_ms = poll_timeout.as_millis() as u64,
            "Client started"
        );

        Self {
            server,
            outbound: queues.outbound.clone(),
            stop_tx,
            reader,
            poll_timeout,
            delivered,
        }
    }

    /// Serialize `request` as JSON and enqueue it. Never waits for a reply.
    pub fn submit<R: Serialize + ?Sized>(&self, request: &R) -> Result<(), SubmitError> {
        let payload = serde_json::to_vec(request)?;
        self.submit_raw(payload)
    }

    /// Enqueue an already encoded request as-is.
    pub fn submit_raw(&self, payload: Vec<u8>) -> Result<(), SubmitError> {
        let len = payload.len();
        self.outbound.push(payload).inspect_err(|_| {
            tracing::error!(bytes = len, "Outbound queue closed; request dropped");
        })?;
        tracing::trace!(bytes = len, "Request queued");
        Ok(())
    }

    /// Stop the server process.
    ///
    /// The reader loop is not told directly; it exits on its own once the
    /// transport reports end-of-stream. Calling this again is safe as long
    /// as the handle's `stop` is.
    pub async fn stop(&mut self) {
        self.server.stop().await;
    }

    /// Ask the reader loop to exit at its next check.
    ///
    /// Best-effort: a response already dequeued when the request lands may
    /// still be delivered.
    pub fn request_stop(&self) {
        self.stop_tx.signal();
    }

    #[must_use]
    pub fn is_reader_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Poll timeout the reader loop runs with.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Number of responses delivered to the handler so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Stop the server, drain what it already sent, and wait for the reader.
    ///
    /// Responses the server emitted before exiting stay on the inbound queue
    /// and are delivered until the loop reaches end-of-stream. The stop
    /// signal is posted only once a whole poll interval passes without a
    /// delivery. A panicking handler is reported here rather than unwinding
    /// into the caller.
    pub async fn shutdown(mut self) -> Result<ReaderExit, ClientError> {
        self.stop().await;
        let exit = match self.drain().await {
            Some(joined) => joined?,
            None => {
                tracing::debug!("Reader idle after server stop; signalling it");
                self.request_stop();
                (&mut self.reader).await?
            }
        };
        tracing::info!(
            reason = exit.label(),
            delivered = self.delivered(),
            "Client shut down"
        );
        Ok(exit)
    }

    /// Wait for the reader to exit on its own while it keeps delivering.
    ///
    /// `None` once a poll interval elapses with no new delivery.
    async fn drain(&mut self) -> Option<Result<ReaderExit, JoinError>> {
        loop {
            let before = self.delivered();
            if let Ok(joined) = tokio::time::timeout(self.poll_timeout, &mut self.reader).await {
                return Some(joined);
            }
            if self.delivered() == before {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Clone, Default)]
    struct MockServer {
        stops: Arc<AtomicUsize>,
    }

    impl ServerHandle for MockServer {
        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options() -> ClientOptions {
        ClientOptions {
            poll_timeout: Duration::from_millis(20),
        }
    }

    fn start_client(
        queues: &SessionQueues,
    ) -> (
        Client<MockServer>,
        MockServer,
        mpsc::UnboundedReceiver<serde_json::Value>,
    ) {
        let server = MockServer::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client::start(
            server.clone(),
            queues,
            move |response: serde_json::Value| {
                let _ = tx.send(response);
            },
            options(),
        );
        (client, server, rx)
    }

    #[derive(Serialize)]
    struct Completion<'a> {
        command: &'a str,
        line: u32,
    }

    #[tokio::test]
    async fn test_submit_serializes_onto_outbound_queue() {
        let queues = SessionQueues::new();
        let (client, _server, _rx) = start_client(&queues);

        client
            .submit(&Completion {
                command: "completion",
                line: 3,
            })
            .unwrap();

        let payload = queues.outbound.try_pop().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"command": "completion", "line": 3})
        );
    }

    #[tokio::test]
    async fn test_submit_raw_is_byte_exact() {
        let queues = SessionQueues::new();
        let (client, _server, _rx) = start_client(&queues);

        client.submit_raw(b"parse \"a.fsx\"".to_vec()).unwrap();
        assert_eq!(queues.outbound.try_pop().unwrap(), b"parse \"a.fsx\"");
    }

    #[tokio::test]
    async fn test_submit_after_outbound_closed_fails() {
        let queues = SessionQueues::new();
        let (client, _server, _rx) = start_client(&queues);

        queues.outbound.close();
        let err = client.submit(&serde_json::json!({"x": 1})).unwrap_err();
        assert!(matches!(err, SubmitError::QueueClosed(_)));
    }

    #[tokio::test]
    async fn test_submit_unserializable_request_fails() {
        let queues = SessionQueues::new();
        let (client, _server, _rx) = start_client(&queues);

        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], "non-string key");
        let err = client.submit(&bad).unwrap_err();
        assert!(matches!(err, SubmitError::Serialize(_)));
        assert!(queues.outbound.try_pop().is_err());
    }

    #[tokio::test]
    async fn test_reader_runs_from_construction() {
        let queues = SessionQueues::new();
        let (_client, _server, mut rx) = start_client(&queues);

        queues
            .inbound
            .push(br#"{"type":"ack","id":1}"#.to_vec())
            .unwrap();

        let response = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(response, serde_json::json!({"type": "ack", "id": 1}));
    }

    #[tokio::test]
    async fn test_stop_delegates_and_leaves_reader_running() {
        let queues = SessionQueues::new();
        let (mut client, server, mut rx) = start_client(&queues);

        client.stop().await;
        client.stop().await;
        assert_eq!(server.stops.load(Ordering::SeqCst), 2);

        queues.inbound.push(br#"{"late":true}"#.to_vec()).unwrap();
        let response = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(response, serde_json::json!({"late": true}));
        assert!(!client.is_reader_finished());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_reader() {
        let queues = SessionQueues::new();
        let (client, server, _rx) = start_client(&queues);

        let exit = tokio::time::timeout(WAIT, client.shutdown())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, ReaderExit::StopRequested);
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
    }

    /// Emits its remaining output onto the inbound queue while stopping,
    /// the way a process transport flushes stdout before end-of-stream.
    struct FlushingServer {
        inbound: MessageQueue,
        remaining: Vec<Vec<u8>>,
    }

    impl ServerHandle for FlushingServer {
        async fn stop(&mut self) {
            for payload in self.remaining.drain(..) {
                self.inbound.push(payload).unwrap();
            }
            self.inbound.push(Vec::new()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_shutdown_delivers_output_flushed_during_stop() {
        let queues = SessionQueues::new();
        let server = FlushingServer {
            inbound: queues.inbound.clone(),
            remaining: vec![
                br#"{"id":1}"#.to_vec(),
                br#"{"id":2}"#.to_vec(),
                br#"{"id":3}"#.to_vec(),
            ],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client::start(
            server,
            &queues,
            move |response: serde_json::Value| {
                let _ = tx.send(response);
            },
            options(),
        );

        let exit = tokio::time::timeout(WAIT, client.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ReaderExit::EndOfStream);

        let mut received = Vec::new();
        while let Ok(response) = rx.try_recv() {
            received.push(response);
        }
        assert_eq!(
            received,
            vec![
                serde_json::json!({"id": 1}),
                serde_json::json!({"id": 2}),
                serde_json::json!({"id": 3}),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_poll_timeout_is_raised_to_minimum() {
        let queues = SessionQueues::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client::start(
            MockServer::default(),
            &queues,
            move |response: serde_json::Value| {
                let _ = tx.send(response);
            },
            ClientOptions {
                poll_timeout: Duration::ZERO,
            },
        );
        assert_eq!(client.poll_timeout(), crate::types::MIN_POLL_TIMEOUT);

        queues.inbound.push(b"[1]".to_vec()).unwrap();
        let response = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(response, serde_json::json!([1]));
        assert_eq!(client.delivered(), 1);

        let exit = tokio::time::timeout(WAIT, client.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ReaderExit::StopRequested);
    }

    #[tokio::test]
    async fn test_shutdown_after_end_of_stream() {
        let queues = SessionQueues::new();
        let (client, _server, _rx) = start_client(&queues);

        queues.inbound.push(Vec::new()).unwrap();
        tokio::time::timeout(WAIT, async {
            while !client.is_reader_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(client.shutdown().await.unwrap(), ReaderExit::EndOfStream);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported_by_shutdown() {
        struct PanickingHandler;

        impl ResponseHandler for PanickingHandler {
            fn handle(&mut self, _response: serde_json::Value) {
                panic!("handler bug");
            }
        }

        let queues = SessionQueues::new();
        let client = Client::start(MockServer::default(), &queues, PanickingHandler, options());

        queues.inbound.push(b"{}".to_vec()).unwrap();
        tokio::time::timeout(WAIT, async {
            while !client.is_reader_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let result = client.shutdown().await;
        assert!(matches!(result, Err(ClientError::ReaderFailed(_))));
    }
}
