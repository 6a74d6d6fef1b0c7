//! Newline-delimited framing for the process transport.
//!
//! The server speaks one JSON document per line on stdin/stdout. This module
//! only splits and joins lines; decoding the documents is the reader loop's
//! job.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum line size (4 MiB) to prevent unbounded memory allocation.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Reads newline-terminated payloads from an async reader.
pub struct LineReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next non-blank line, without its terminator.
    ///
    /// Returns `Ok(None)` on EOF. A final line without a trailing newline is
    /// still returned.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let limit = MAX_LINE_BYTES as u64 + 1;
        let mut line = Vec::new();

        loop {
            line.clear();
            let bytes_read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut line)
                .await
                .context("reading line")?;

            if bytes_read == 0 {
                return Ok(None);
            }

            if !line.ends_with(b"\n") && line.len() as u64 == limit {
                bail!("line exceeds maximum of {MAX_LINE_BYTES} bytes");
            }

            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }

            // Blank lines carry nothing; an empty payload means end-of-stream
            // to the reader loop, so never forward one.
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

/// Writes payloads as newline-terminated lines.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_line(&mut self, payload: &[u8]) -> Result<()> {
        if payload.contains(&b'\n') {
            bail!("payload contains a newline and cannot be framed as one line");
        }

        self.writer
            .write_all(payload)
            .await
            .context("writing line body")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("writing line terminator")?;
        self.writer.flush().await.context("flushing line")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let payload = br#"{"type":"ack","id":1}"#;

        let mut buf = Vec::new();
        let mut writer = LineWriter::new(&mut buf);
        writer.write_line(payload).await.unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let mut reader = LineReader::new(buf.as_slice());
        assert_eq!(reader.read_line().await.unwrap().unwrap(), payload);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiple_lines() {
        let buf: &[u8] = b"{\"id\":1}\n{\"id\":2}\n";
        let mut reader = LineReader::new(buf);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"{\"id\":1}");
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"{\"id\":2}");
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = LineReader::new(buf);
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let buf: &[u8] = b"{\"id\":1}\r\n";
        let mut reader = LineReader::new(buf);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"{\"id\":1}");
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let buf: &[u8] = b"\n\r\n{\"id\":1}\n\n";
        let mut reader = LineReader::new(buf);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"{\"id\":1}");
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_returned() {
        let buf: &[u8] = b"{\"id\":1}";
        let mut reader = LineReader::new(buf);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"{\"id\":1}");
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() {
        let buf = vec![b'x'; MAX_LINE_BYTES + 2];
        let mut reader = LineReader::new(buf.as_slice());
        assert!(reader.read_line().await.is_err());
    }

    #[tokio::test]
    async fn test_line_at_limit_accepted() {
        let mut buf = vec![b'x'; MAX_LINE_BYTES];
        buf.push(b'\n');
        let mut reader = LineReader::new(buf.as_slice());
        assert_eq!(
            reader.read_line().await.unwrap().unwrap().len(),
            MAX_LINE_BYTES
        );
    }

    #[tokio::test]
    async fn test_non_utf8_bytes_pass_through() {
        let buf: &[u8] = b"\xff\xfe\n";
        let mut reader = LineReader::new(buf);
        assert_eq!(reader.read_line().await.unwrap().unwrap(), b"\xff\xfe");
    }

    #[tokio::test]
    async fn test_write_rejects_embedded_newline() {
        let mut buf = Vec::new();
        let mut writer = LineWriter::new(&mut buf);
        assert!(writer.write_line(b"{\n}").await.is_err());
        assert!(buf.is_empty());
    }
}
