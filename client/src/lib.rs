//! Queue-driven client for an external F# analysis server.
//!
//! Requests are serialized onto an outbound [`MessageQueue`]; responses are
//! drained from an inbound queue by a background reader task and handed to
//! a caller-supplied handler. [`ProcessServer`] bridges both queues to a
//! child process speaking newline-delimited JSON.

pub mod codec;
pub mod config;
pub mod queue;
pub mod reader;
pub mod signal;
pub mod types;

mod client;
mod server;

pub use client::{Client, ClientError, SubmitError};
pub use config::{ConfigError, FsacConfig, ServerConfig};
pub use queue::{MessageQueue, PopError, QueueClosed};
pub use reader::{DecodeError, ResponseHandler, decode_payload};
pub use server::{ProcessServer, ServerHandle};
pub use signal::{StopPoll, StopReceiver, StopSender, stop_channel};
pub use types::{
    ClientOptions, DEFAULT_POLL_TIMEOUT, MIN_POLL_TIMEOUT, ReaderExit, SessionQueues,
};
