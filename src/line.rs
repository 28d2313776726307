//! Writes multi-line SMTP responses with correct separator discipline
//! and reads logical lines / dot-terminated message bodies (C3).
//!
//! Layered over any `AsyncBufRead`/`AsyncWrite` pair (the teacher's
//! `SmtpProtocol<R, W>` is generic the same way) so tests can substitute
//! in-memory buffers for a real `TcpStream`.

use std::fmt;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

/// Distinguishes a size-limit violation from any other failure while
/// reading a DATA body, so callers can map it to 552 rather than 421.
#[derive(Debug)]
pub struct BodyOverflow;

impl fmt::Display for BodyOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body exceeds size limit")
    }
}

impl std::error::Error for BodyOverflow {}

/// A logical-line reader/multi-line-response writer over a connection.
pub struct LineIo<R, W> {
    reader: R,
    writer: W,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl<R, W> LineIo<R, W>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        LineIo {
            reader,
            writer,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Reads one CRLF- (or bare LF-) terminated line, stripped of its
    /// terminator. Returns an empty string on EOF.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf).await?;
        self.bytes_in += n as u64;
        if n == 0 {
            return Ok(String::new());
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes a (possibly multi-line) reply. `text` is split on `\n`;
    /// every line but the last gets a `-` separator, the last gets a
    /// space unless `continued` is true (in which case it also gets `-`).
    pub async fn respond(&mut self, code: u16, continued: bool, text: &str) -> Result<()> {
        let lines: Vec<&str> = text.split('\n').collect();
        let last_idx = lines.len().saturating_sub(1);
        for (i, line) in lines.iter().enumerate() {
            let sep = if i == last_idx && !continued { ' ' } else { '-' };
            let out = format!("{code:03}{sep}{line}\r\n");
            self.writer.write_all(out.as_bytes()).await?;
        }
        self.writer.flush().await?;
        // Approximation of framing overhead, matching the original engine's accounting.
        self.bytes_out += text.len() as u64 + 6;
        Ok(())
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

/// Reads a dot-stuffed DATA body, applying dot-unstuffing, terminated by
/// a line containing only `.`. Enforces `max_bytes` by reading one byte
/// past the limit to detect overflow; on overflow, returns `Err` with the
/// partial body already drained from the wire up to that point (the
/// caller is still responsible for draining any remainder so the wire
/// stays synchronized — see `drain_rest`).
pub async fn read_dot_body(
    reader: &mut (dyn AsyncBufRead + Unpin + Send),
    max_bytes: usize,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut raw = String::new();
        let n = reader.read_line(&mut raw).await?;
        if n == 0 {
            return Err(anyhow!("connection closed during DATA"));
        }
        let line = raw.trim_end_matches(['\r', '\n']);
        if line == "." {
            return Ok(body);
        }
        let unstuffed = line.strip_prefix('.').unwrap_or(line);
        if !body.is_empty() {
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(unstuffed.as_bytes());
        if body.len() > max_bytes {
            return Err(BodyOverflow.into());
        }
    }
}

/// Drains the remainder of a DATA body from the wire without buffering
/// it, used after a mid-body failure (overflow, parse error) so the next
/// read on the connection is not desynchronized with a partial message.
pub async fn drain_rest(reader: &mut (dyn AsyncBufRead + Unpin + Send)) -> Result<()> {
    loop {
        let mut raw = String::new();
        let n = reader.read_line(&mut raw).await?;
        if n == 0 {
            return Ok(());
        }
        if raw.trim_end_matches(['\r', '\n']) == "." {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, BufReader};

    #[tokio::test]
    async fn respond_writes_multiline_with_correct_terminators() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let mut io = LineIo::new(BufReader::new(server_read), server_write);
        io.respond(250, false, "hello\nworld").await.unwrap();
        drop(io);

        let mut buf = Vec::new();
        let mut client = client;
        client.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "250-hello\r\n250 world\r\n");
    }

    #[tokio::test]
    async fn dot_reader_unstuffs_and_stops_at_lone_dot() {
        let input = b"Subject: hi\r\n..leading dot\r\nplain\r\n.\r\n".to_vec();
        let mut reader = BufReader::new(&input[..]);
        let body = read_dot_body(&mut reader, 1 << 20).await.unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "Subject: hi\r\n.leading dot\r\nplain"
        );
    }

    #[tokio::test]
    async fn dot_reader_detects_overflow() {
        let mut data = Vec::new();
        data.extend_from_slice(b"x".repeat(10).as_slice());
        data.extend_from_slice(b"\r\n.\r\n");
        let mut reader = BufReader::new(&data[..]);
        let result = read_dot_body(&mut reader, 5).await;
        assert!(result.is_err());
    }
}
