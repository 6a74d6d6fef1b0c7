//! fsac - host binary for an analysis server session.
//!
//! ```text
//! stdin line -> Client::submit_raw -> outbound queue -> server stdin
//! server stdout -> inbound queue -> reader loop -> stdout (one JSON per line)
//! ```
//!
//! Usage: `fsac [CONFIG]`. Without an argument the config is read from
//! `~/.fsac/config.toml` when present. Logs go to stderr and are filtered
//! with `RUST_LOG` (default `info`), since stdout carries responses.
//!
//! The session ends on stdin EOF, Ctrl-C, or when the server closes its
//! output.

use std::env;
use std::io::{Write, stdout};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fsac_client::{Client, FsacConfig, ProcessServer, SessionQueues};

/// How often the main loop checks whether the reader has already exited.
const READER_CHECK_INTERVAL: Duration = Duration::from_millis(500);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config() -> Result<FsacConfig> {
    match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            FsacConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => FsacConfig::load_default().context("loading default config"),
    }
}

/// Payload for one stdin line, or `None` for a blank line.
///
/// Requests are forwarded verbatim; an empty payload would never reach the
/// server as a command.
fn request_payload(line: &str) -> Option<Vec<u8>> {
    let trimmed = line.trim_end();
    if trimmed.trim_start().is_empty() {
        return None;
    }
    Some(trimmed.as_bytes().to_vec())
}

fn print_response(response: serde_json::Value) {
    let mut out = stdout().lock();
    if let Err(e) = writeln!(out, "{response}").and_then(|()| out.flush()) {
        tracing::warn!("Failed to write response: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let queues = SessionQueues::new();
    let server = ProcessServer::spawn(config.server(), &queues)?;
    let client = Client::start(server, &queues, print_response, config.client_options());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reader_check = tokio::time::interval(READER_CHECK_INTERVAL);
    reader_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                let Some(payload) = request_payload(&line) else {
                    continue;
                };
                if let Err(e) = client.submit_raw(payload) {
                    tracing::warn!("Request not sent: {e}");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = reader_check.tick() => {
                if client.is_reader_finished() {
                    tracing::info!("Server output ended");
                    break;
                }
            }
        }
    }

    let exit = client.shutdown().await?;
    tracing::info!(reason = exit.label(), "Session ended");
    Ok(())
}
