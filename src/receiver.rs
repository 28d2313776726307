//! The abstract callback surface the engine invokes at each protocol
//! event (C5). Modeled as a capability set, not an inheritance
//! hierarchy — implementations supply the full set; default no-op
//! behavior for unused verbs returns 502, never silence.

use std::net::SocketAddr;

use async_trait::async_trait;

/// The `{code, text, terminate}` triple a callback returns to tell the
/// engine what to send and whether to close the connection.
///
/// `code == 0` means "no reply from this callback — engine chooses the
/// default for this transition."
#[derive(Debug, Clone, Default)]
pub struct ReplyDisposition {
    pub code: u16,
    pub text: String,
    pub terminate: bool,
}

impl ReplyDisposition {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        ReplyDisposition {
            code,
            text: text.into(),
            terminate: false,
        }
    }

    pub fn terminating(code: u16, text: impl Into<String>) -> Self {
        ReplyDisposition {
            code,
            text: text.into(),
            terminate: true,
        }
    }

    /// The "engine chooses default" sentinel.
    pub fn none() -> Self {
        ReplyDisposition::default()
    }
}

/// Callback surface invoked by the connection engine (C4). All callbacks
/// run on the engine's own task for that connection; implementations may
/// block but must not assume concurrency with themselves.
#[async_trait]
pub trait SmtpReceiver: Send {
    async fn connection_opened(&mut self, peer: SocketAddr) -> ReplyDisposition;

    async fn connection_closed(&mut self);

    /// `esmtp` distinguishes `EHLO` (true) from `HELO` (false) — see
    /// SPEC_FULL.md's resolution of the open question in spec.md §9.
    async fn helo(&mut self, hostname: &str, esmtp: bool) -> ReplyDisposition;

    async fn mail_from(&mut self, param: &str) -> ReplyDisposition;

    async fn rcpt_to(&mut self, param: &str) -> ReplyDisposition;

    /// The receiver owns the 354 banner: it must call `io.respond(354, ..)`
    /// before reading the body, then `io.read_body()`. On any failure after
    /// the banner it must still call `io.drain_rest()` so the wire stays
    /// synchronized for the next command.
    async fn data(&mut self, io: &mut crate::engine::DataIo<'_>) -> ReplyDisposition;

    async fn etrn(&mut self, domain: &str) -> ReplyDisposition {
        let _ = domain;
        ReplyDisposition::new(crate::reply::SMTP_NOT_IMPLEMENTED, "Not implemented")
    }

    async fn reset(&mut self) -> ReplyDisposition;

    async fn quit(&mut self) -> ReplyDisposition;
}
