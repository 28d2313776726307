//! The message record produced by the submission callback (C6) and
//! consumed by the submission RPC service (C8), plus the submission
//! result returned back to the SMTP engine.

use serde::{Deserialize, Serialize};

/// One header line as it appeared on the wire: a name and one or more
/// values, preserving the order values arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailHeader {
    pub name: String,
    pub values: Vec<String>,
}

/// Categorical result of a quality scanner's verdict on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictKind {
    Ok,
    Spam,
}

/// A structured annotation attached to a message by a downstream scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub source: String,
    pub score: f64,
    pub kind: VerdictKind,
}

/// The assembled record for one SMTP submission, handed from the front
/// tier to the back tier over the submission RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub peer_ip: String,
    /// Reverse-DNS names for `peer_ip`; empty when the lookup failed.
    pub peer_names: Vec<String>,
    pub helo_hostname: String,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    /// Raw body bytes after dot-unstuffing, size-bounded by the engine's cap.
    pub body: Vec<u8>,
    pub headers: Vec<MailHeader>,
    /// Parsed `Date` header, as epoch seconds.
    pub date: Option<i64>,
    pub from: Option<String>,
    pub header_sender: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub message_id: Option<String>,
    pub verdicts: Vec<QualityVerdict>,
}

impl Message {
    pub fn new(peer_ip: String) -> Self {
        Message {
            peer_ip,
            ..Default::default()
        }
    }

    /// Looks up the first value of a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| h.values.first())
            .map(|s| s.as_str())
    }
}

/// The back tier's opinion on how the SMTP engine should respond.
///
/// Absence of both fields means "no opinion, engine default applies."
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub code: Option<u16>,
    pub text: Option<String>,
}

impl SubmissionResult {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        SubmissionResult {
            code: Some(code),
            text: Some(text.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut msg = Message::new("1.2.3.4".into());
        msg.headers.push(MailHeader {
            name: "Subject".into(),
            values: vec!["hi".into()],
        });
        assert_eq!(msg.header("subject"), Some("hi"));
        assert_eq!(msg.header("SUBJECT"), Some("hi"));
        assert_eq!(msg.header("missing"), None);
    }
}
