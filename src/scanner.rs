//! Thin client to the external SPAM-scoring daemon: address handle plus
//! liveness probe (C10).
//!
//! No crate in the pack speaks the SPAMC wire protocol (the original
//! system used `github.com/saintienn/go-spamc`), so it is hand-rolled
//! here the same way the SMTP wire protocol is in `line.rs`: this is
//! protocol plumbing, not a missing ecosystem dependency.
//!
//! Real spamd daemons close the connection after each response (one
//! request per TCP connection, like HTTP/1.0); `ping`/`check` each dial
//! fresh rather than sharing a persistent stream, so a handle is cheap
//! to clone and hand to concurrent callers.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A successful SPAMD response line plus any headers, e.g.
/// `SPAMD/1.2 0 EX_OK` followed by `Spam: True ; 12.3 / 5.0`.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub score: f64,
    pub is_spam: bool,
}

/// A handle to a spamd daemon speaking the SPAMC protocol. Holds only the
/// resolved address; every call opens its own connection.
#[derive(Debug, Clone)]
pub struct SpamdClient {
    addr: String,
}

impl SpamdClient {
    /// Resolves `peer` (`host` or `host:port`; the default spamd port
    /// `783` is assumed when no port is given) and confirms it's reachable
    /// with a single dial, which is then dropped.
    pub async fn connect(peer: &str) -> Result<Self> {
        let addr = if peer.contains(':') {
            peer.to_string()
        } else {
            format!("{peer}:783")
        };
        timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await??;
        Ok(SpamdClient { addr })
    }

    pub fn peer(&self) -> &str {
        &self.addr
    }

    /// Sends a liveness probe over its own connection. Returns `Ok(())`
    /// only on `EX_OK`.
    pub async fn ping(&self) -> Result<()> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await??;
        stream.write_all(b"PING SPAMC/1.2\r\n\r\n").await?;
        stream.flush().await?;
        let (code, _headers, _body) = timeout(CALL_TIMEOUT, read_response(&mut stream)).await??;
        if code != 0 {
            bail!("spamd PING returned non-OK code {code}");
        }
        Ok(())
    }

    /// Submits `message` (a full RFC-5322-shaped byte stream, headers then
    /// blank line then body) for scoring over its own connection.
    pub async fn check(&self, message: &[u8]) -> Result<CheckResult> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await??;
        let mut request = format!(
            "CHECK SPAMC/1.2\r\nContent-length: {}\r\n\r\n",
            message.len()
        )
        .into_bytes();
        request.extend_from_slice(message);
        stream.write_all(&request).await?;
        stream.flush().await?;

        let (code, headers, _body) = timeout(CALL_TIMEOUT, read_response(&mut stream)).await??;
        if code != 0 {
            bail!("spamd CHECK returned non-OK code {code}");
        }
        parse_spam_header(&headers)
    }
}

/// Reads a SPAMD response: the status line, the header block, and
/// whatever body bytes (if any) follow. Returns `(code, headers, body)`.
async fn read_response(stream: &mut TcpStream) -> Result<(i32, Vec<String>, Vec<u8>)> {
    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    read_crlf_line(&mut reader, &mut status_line).await?;

    // "SPAMD/1.2 0 EX_OK"
    let mut parts = status_line.split_whitespace();
    let _proto = parts.next().ok_or_else(|| anyhow!("empty spamd response"))?;
    let code: i32 = parts
        .next()
        .ok_or_else(|| anyhow!("malformed spamd status line: {status_line:?}"))?
        .parse()?;

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let n = read_crlf_line(&mut reader, &mut line).await?;
        if n == 0 || line.is_empty() {
            break;
        }
        headers.push(line);
    }

    let mut body = Vec::new();
    reader.read_to_end(&mut body).await?;
    Ok((code, headers, body))
}

async fn read_crlf_line(reader: &mut BufReader<&mut TcpStream>, out: &mut String) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;
    let n = reader.read_line(out).await?;
    let trimmed = out.trim_end_matches(['\r', '\n']).to_string();
    *out = trimmed;
    Ok(n)
}

/// Parses the `Spam: True ; 12.3 / 5.0` header into a score and flag.
fn parse_spam_header(headers: &[String]) -> Result<CheckResult> {
    let spam_line = headers
        .iter()
        .find(|h| h.to_ascii_lowercase().starts_with("spam:"))
        .ok_or_else(|| anyhow!("spamd response missing Spam: header"))?;

    let rest = spam_line
        .splitn(2, ':')
        .nth(1)
        .ok_or_else(|| anyhow!("malformed Spam: header: {spam_line:?}"))?;
    let mut fields = rest.splitn(2, ';');
    let flag = fields
        .next()
        .ok_or_else(|| anyhow!("malformed Spam: header: {spam_line:?}"))?
        .trim();
    let is_spam = flag.eq_ignore_ascii_case("true");

    let score_part = fields
        .next()
        .ok_or_else(|| anyhow!("malformed Spam: header: {spam_line:?}"))?;
    let score: f64 = score_part
        .split('/')
        .next()
        .ok_or_else(|| anyhow!("malformed Spam: header: {spam_line:?}"))?
        .trim()
        .parse()?;

    Ok(CheckResult { score, is_spam })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spam_header_true() {
        let headers = vec!["Spam: True ; 12.3 / 5.0".to_string()];
        let result = parse_spam_header(&headers).unwrap();
        assert!(result.is_spam);
        assert!((result.score - 12.3).abs() < 1e-9);
    }

    #[test]
    fn parses_spam_header_false() {
        let headers = vec!["Spam: False ; 1.0 / 5.0".to_string()];
        let result = parse_spam_header(&headers).unwrap();
        assert!(!result.is_spam);
        assert!((result.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_header_is_an_error() {
        let headers: Vec<String> = vec![];
        assert!(parse_spam_header(&headers).is_err());
    }
}
