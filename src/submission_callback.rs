//! Concrete receiver that assembles a message record, enforces command
//! ordering, parses mail headers, enforces the size cap, and hands the
//! record to the back tier over RPC (C6).
//!
//! Grounded in the teacher's `handle_connection` state threading
//! (`sender`/`recipient`/`email_data` locals in `smtp/mod.rs`),
//! generalized into the `Message` record, and in `EmailParser::parse`
//! for header-line scanning, generalized from "extract Subject" to full
//! RFC 5322 header capture.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use hickory_resolver::TokioAsyncResolver;
use log::{error, info};

use crate::engine::DataIo;
use crate::line::BodyOverflow;
use crate::message::{MailHeader, Message};
use crate::metrics::Metrics;
use crate::receiver::{ReplyDisposition, SmtpReceiver};
use crate::reply::*;
use crate::rpc;

/// Splits a dot-unstuffed DATA payload into its header block and body,
/// at the first blank line, the way RFC 5322 defines the boundary.
fn split_headers_and_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let needle = b"\r\n\r\n";
    if let Some(pos) = raw.windows(needle.len()).position(|w| w == needle) {
        return (&raw[..pos], &raw[pos + needle.len()..]);
    }
    // Tolerate a bare header-only body (no blank line at all).
    (raw, &[])
}

/// Parses an RFC 5322 header block into ordered entries, unfolding
/// continuation lines (those starting with whitespace) into the
/// preceding header's value.
fn parse_headers(block: &[u8]) -> Vec<MailHeader> {
    let text = String::from_utf8_lossy(block);
    let mut headers: Vec<MailHeader> = Vec::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && !headers.is_empty() {
            if let Some(last) = headers.last_mut() {
                if let Some(value) = last.values.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push(MailHeader {
                name: name.trim().to_string(),
                values: vec![value.trim().to_string()],
            });
        }
    }
    headers
}

fn header_value<'a>(headers: &'a [MailHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| h.values.first())
        .map(|s| s.as_str())
}

/// Splits a comma-separated address list header (`To`, `Cc`) into its
/// individual mailbox strings. Best-effort: RFC 5322 address lists can
/// contain quoted display names with embedded commas, which this does
/// not attempt to handle.
fn split_address_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

struct Envelope {
    helo_hostname: Option<String>,
    esmtp: bool,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Envelope {
    fn new() -> Self {
        Envelope {
            helo_hostname: None,
            esmtp: false,
            sender: None,
            recipients: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

/// Where the front tier sends assembled messages, and how.
#[derive(Clone)]
pub struct BackendTarget {
    pub submission_uri: String,
    pub tls: Option<(Arc<rustls::ClientConfig>, String)>,
}

/// The receiver that owns one SMTP connection's envelope state and
/// message record. One instance per accepted connection.
pub struct SubmissionCallback {
    peer: SocketAddr,
    resolver: Arc<TokioAsyncResolver>,
    backend: BackendTarget,
    max_body_bytes: usize,
    metrics: Arc<Metrics>,
    envelope: Envelope,
    message: Option<Message>,
}

impl SubmissionCallback {
    pub fn new(
        peer: SocketAddr,
        resolver: Arc<TokioAsyncResolver>,
        backend: BackendTarget,
        max_body_bytes: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        SubmissionCallback {
            peer,
            resolver,
            backend,
            max_body_bytes,
            metrics,
            envelope: Envelope::new(),
            message: None,
        }
    }

    /// A fresh message record for the next envelope on this connection,
    /// carrying over the peer identity established in `connection_opened`
    /// (spec.md §3: the record is destroyed on RSET or connection close,
    /// but peer IP/reverse-DNS names belong to the connection, not the
    /// envelope).
    fn fresh_message(&self) -> Message {
        let mut msg = Message::new(self.peer.ip().to_string());
        if let Some(existing) = &self.message {
            msg.peer_names = existing.peer_names.clone();
        }
        msg
    }
}

#[async_trait]
impl SmtpReceiver for SubmissionCallback {
    async fn connection_opened(&mut self, peer: SocketAddr) -> ReplyDisposition {
        let mut msg = Message::new(peer.ip().to_string());
        msg.peer_names = reverse_dns(&self.resolver, peer.ip()).await;
        self.message = Some(msg);
        ReplyDisposition::none()
    }

    async fn connection_closed(&mut self) {
        self.message = None;
    }

    async fn helo(&mut self, hostname: &str, esmtp: bool) -> ReplyDisposition {
        self.envelope.helo_hostname = Some(hostname.to_string());
        self.envelope.esmtp = esmtp;
        if let Some(msg) = self.message.as_mut() {
            msg.helo_hostname = hostname.to_string();
        }

        if esmtp {
            // Let the engine build and emit the multi-line capability
            // announcement; code 0 means "no opinion, engine default".
            ReplyDisposition::none()
        } else {
            ReplyDisposition::new(SMTP_COMPLETED, format!("MailPump greets {hostname}"))
        }
    }

    async fn mail_from(&mut self, param: &str) -> ReplyDisposition {
        if self.envelope.helo_hostname.is_none() {
            return ReplyDisposition::new(SMTP_BAD_SEQUENCE, "Polite people say Hello first!");
        }
        match crate::address::parse_from(param) {
            Some(addr) => {
                self.envelope.sender = Some(addr.clone());
                if let Some(msg) = self.message.as_mut() {
                    msg.sender = Some(addr);
                }
                ReplyDisposition::new(SMTP_COMPLETED, "Ok.")
            }
            None => ReplyDisposition::new(SMTP_PARAMETER_NOT_IMPLEMENTED, "Malformed address"),
        }
    }

    async fn rcpt_to(&mut self, param: &str) -> ReplyDisposition {
        if self.envelope.sender.is_none() {
            return ReplyDisposition::new(SMTP_BAD_SEQUENCE, "Need MAIL command before RCPT.");
        }
        match crate::address::parse_to(param) {
            Some(addr) => {
                self.envelope.recipients.push(addr.clone());
                if let Some(msg) = self.message.as_mut() {
                    msg.recipients.push(addr);
                }
                ReplyDisposition::new(SMTP_COMPLETED, "Ok.")
            }
            None => ReplyDisposition::new(SMTP_PARAMETER_NOT_IMPLEMENTED, "Malformed address"),
        }
    }

    async fn data(&mut self, io: &mut DataIo<'_>) -> ReplyDisposition {
        if self.envelope.sender.is_none() {
            return ReplyDisposition::new(SMTP_BAD_SEQUENCE, "Need MAIL command before DATA.");
        }
        if self.envelope.recipients.is_empty() {
            return ReplyDisposition::new(SMTP_BAD_SEQUENCE, "Need RCPT command before DATA.");
        }

        if let Err(e) = io.respond(SMTP_PROCEED, "Proceed with message.").await {
            error!("failed writing 354 banner to {}: {e}", self.peer);
            return ReplyDisposition::terminating(SMTP_UNAVAIL, "Connection error");
        }

        let raw = match io.read_body().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = io.drain_rest().await;
                if e.downcast_ref::<BodyOverflow>().is_some() {
                    return ReplyDisposition::terminating(
                        SMTP_MESSAGE_TOO_BIG,
                        "Size limit exceeded. Message rejected.",
                    );
                }
                error!("failed reading DATA body from {}: {e}", self.peer);
                return ReplyDisposition::terminating(SMTP_UNAVAIL, e.to_string());
            }
        };

        let (header_block, body) = split_headers_and_body(&raw);
        let headers = parse_headers(header_block);

        let msg = match self.message.as_mut() {
            Some(msg) => msg,
            None => {
                // connection_opened always runs first; reachable only on a
                // programming error, not client input.
                return ReplyDisposition::terminating(SMTP_LOCALERR, "Internal error");
            }
        };

        msg.body = body.to_vec();
        msg.date = header_value(&headers, "Date").and_then(|v| {
            DateTime::parse_from_rfc2822(v).ok().map(|dt| dt.timestamp())
        });
        msg.from = header_value(&headers, "From").map(|s| s.to_string());
        msg.header_sender = header_value(&headers, "Sender").map(|s| s.to_string());
        msg.to = header_value(&headers, "To").map(split_address_list).unwrap_or_default();
        msg.cc = header_value(&headers, "Cc").map(split_address_list).unwrap_or_default();
        msg.message_id = header_value(&headers, "Message-Id")
            .or_else(|| header_value(&headers, "Message-ID"))
            .map(|s| s.to_string());
        msg.headers = headers;

        let outgoing = msg.clone();
        let result = match rpc::call_send(&self.backend.submission_uri, self.backend.tls.clone(), outgoing).await {
            Ok(result) => result,
            Err(e) => {
                error!("submission RPC to {} failed: {e}", self.backend.submission_uri);
                self.metrics.spamd_eval_errors.incr(&e.to_string());
                return ReplyDisposition::new(SMTP_LOCALERR, "Error communicating with backend");
            }
        };

        self.envelope.reset();
        self.message = Some(self.fresh_message());
        let code = result.code.unwrap_or(SMTP_UNAVAIL);
        let text = result.text.unwrap_or_else(|| "Ok.".to_string());
        ReplyDisposition::new(code, text)
    }

    async fn reset(&mut self) -> ReplyDisposition {
        self.envelope.reset();
        self.message = Some(self.fresh_message());
        ReplyDisposition::new(SMTP_COMPLETED, "Ok.")
    }

    async fn quit(&mut self) -> ReplyDisposition {
        ReplyDisposition::terminating(SMTP_CLOSING, "See you later!")
    }
}

/// Resolves `ip`'s PTR records. Failures are non-fatal: an empty list is
/// returned and the caller proceeds without reverse-DNS names.
async fn reverse_dns(resolver: &TokioAsyncResolver, ip: IpAddr) -> Vec<String> {
    match resolver.reverse_lookup(ip).await {
        Ok(lookup) => lookup.iter().map(|name| name.to_string()).collect(),
        Err(e) => {
            info!("reverse DNS lookup for {ip} failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_headers_from_body_at_blank_line() {
        let raw = b"Subject: hi\r\nFrom: a@b\r\n\r\nhello world";
        let (headers, body) = split_headers_and_body(raw);
        assert_eq!(headers, b"Subject: hi\r\nFrom: a@b");
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn parses_headers_with_folded_continuation() {
        let block = b"Subject: hi\r\n there\r\nFrom: a@b";
        let headers = parse_headers(block);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name, "Subject");
        assert_eq!(headers[0].values[0], "hi there");
        assert_eq!(headers[1].name, "From");
    }

    #[test]
    fn splits_comma_separated_address_list() {
        let addrs = split_address_list("a@b, c@d ,e@f");
        assert_eq!(addrs, vec!["a@b", "c@d", "e@f"]);
    }

    #[test]
    fn header_value_is_case_insensitive() {
        let headers = vec![MailHeader {
            name: "MESSAGE-ID".into(),
            values: vec!["<abc@x>".into()],
        }];
        assert_eq!(header_value(&headers, "message-id"), Some("<abc@x>"));
    }
}
