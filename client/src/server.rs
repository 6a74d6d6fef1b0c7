//! Server handles: the collaborator that owns the analysis process.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::codec::{LineReader, LineWriter};
use crate::config::ServerConfig;
use crate::queue::MessageQueue;
use crate::types::SessionQueues;

/// Environment variables never passed to the server process.
const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_API_KEY",
    "*_TOKEN",
    "*_SECRET*",
    "*_PASSWORD*",
    "*_CREDENTIAL*",
    "AWS_*",
    "NUGET_*KEY*",
];

/// Anything that can terminate the external server process.
///
/// `stop` is called from the caller's context and may be called more than
/// once; implementations should treat repeated calls as no-ops.
pub trait ServerHandle: Send {
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// Minimal glob matcher for env var denylist patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, `PREFIX*INFIX*`, and exact match.
/// Both pattern and key are compared in uppercase.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    let mut parts = pat.split('*');
    let Some(first) = parts.next() else {
        return false;
    };
    let Some(mut rest) = key_upper.strip_prefix(first) else {
        return false;
    };

    let segments: Vec<&str> = parts.collect();
    let Some((last, middle)) = segments.split_last() else {
        // No wildcard at all.
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

fn is_secret_env(key: &str) -> bool {
    let upper = key.to_uppercase();
    ENV_SECRET_DENYLIST
        .iter()
        .any(|pat| env_glob_matches(pat, &upper))
}

/// Tasks and process of a live server.
struct Running {
    child: Child,
    outbound: MessageQueue,
    writer_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.writer_handle.abort();
        self.reader_handle.abort();
    }
}

/// A server running as a child process, bridged to a session's queues.
///
/// A writer task drains the outbound queue into the child's stdin, one line
/// per payload. A reader task pushes every stdout line onto the inbound
/// queue and, when stdout closes, one empty payload as the end-of-stream
/// marker. The child is killed if the handle is dropped while running.
pub struct ProcessServer {
    name: String,
    shutdown_timeout: Duration,
    running: Option<Running>,
}

impl ProcessServer {
    pub fn spawn(config: &ServerConfig, queues: &SessionQueues) -> Result<Self> {
        let command = config.command();
        let resolved_cmd =
            which::which(&command).with_context(|| format!("{command} not found in PATH"))?;
        let mut cmd = Command::new(&resolved_cmd);
        cmd.args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (key, _) in std::env::vars() {
            if is_secret_env(&key) {
                cmd.env_remove(&key);
            }
        }

        let mut child = cmd.spawn().with_context(|| format!("spawning {command}"))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let writer_queue = queues.outbound.clone();
        let writer_name = command.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = LineWriter::new(stdin);
            while let Some(payload) = writer_queue.recv().await {
                if let Err(e) = writer.write_line(&payload).await {
                    tracing::warn!("Write to '{writer_name}' failed: {e:#}");
                    break;
                }
            }
            tracing::debug!("Writer for '{writer_name}' finished; closing stdin");
        });

        let reader_queue = queues.inbound.clone();
        let reader_name = command.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = LineReader::new(stdout);
            loop {
                match reader.read_line().await {
                    Ok(Some(line)) => {
                        if reader_queue.push(line).is_err() {
                            tracing::debug!("Inbound queue closed; '{reader_name}' reader exiting");
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Server '{reader_name}' closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Read from '{reader_name}' failed: {e:#}");
                        break;
                    }
                }
            }
            let _ = reader_queue.push(Vec::new());
        });

        tracing::info!(pid = ?child.id(), "Started server '{command}'");

        Ok(Self {
            name: command,
            shutdown_timeout: config.shutdown_timeout(),
            running: Some(Running {
                child,
                outbound: queues.outbound.clone(),
                writer_handle,
                reader_handle,
            }),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// OS process id, while running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|running| running.child.id())
    }
}

impl ServerHandle for ProcessServer {
    /// Close the outbound queue, let the writer flush and drop stdin, then
    /// wait for the child. Kills it after the shutdown timeout.
    async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            tracing::trace!("Server '{}' already stopped", self.name);
            return;
        };

        tracing::info!("Stopping server '{}'...", self.name);
        running.outbound.close();

        if tokio::time::timeout(self.shutdown_timeout, &mut running.writer_handle)
            .await
            .is_err()
        {
            tracing::debug!("Writer for '{}' didn't drain in time", self.name);
            running.writer_handle.abort();
        }

        match tokio::time::timeout(self.shutdown_timeout, running.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("Server '{}' exited with {status}", self.name);
            }
            Ok(Err(e)) => {
                tracing::warn!("Waiting for server '{}' failed: {e}", self.name);
            }
            Err(_) => {
                tracing::debug!("Server '{}' didn't exit in time, killing", self.name);
                let _ = running.child.kill().await;
            }
        }

        if tokio::time::timeout(self.shutdown_timeout, &mut running.reader_handle)
            .await
            .is_err()
        {
            tracing::debug!("Reader for '{}' didn't finish in time", self.name);
        }
    }
}
