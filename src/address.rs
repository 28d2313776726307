//! Extracts an RFC-shaped mailbox from `MAIL FROM:` / `RCPT TO:` parameters (C2).
//!
//! Both `<addr>` and bare `addr` forms are accepted. A successful match
//! yields exactly one non-empty captured address; a non-match is a
//! parameter error (reply 504).

use std::sync::LazyLock;

use regex::Regex;

const ADDR: &str = r"[\w+\-.]+(?:%[\w+\-.]+)?@[\w+\-.]+";

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^FROM:\s*(?:<({ADDR})>|({ADDR}))$")).expect("valid FROM regex")
});

static TO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^TO:\s*(?:<({ADDR})>|({ADDR}))$")).expect("valid TO regex")
});

/// Picks the single non-empty capture group out of a two-alternative match.
///
/// At most one alternative ever matches, so whichever group is `Some` wins.
fn first_capture(caps: &regex::Captures) -> Option<String> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Parses a `MAIL FROM:` parameter string (the text after the command verb).
pub fn parse_from(param: &str) -> Option<String> {
    FROM_RE.captures(param.trim()).and_then(|c| first_capture(&c))
}

/// Parses a `RCPT TO:` parameter string (the text after the command verb).
pub fn parse_to(param: &str) -> Option<String> {
    TO_RE.captures(param.trim()).and_then(|c| first_capture(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_accepts_angle_brackets() {
        assert_eq!(parse_from("FROM:<a@b>"), Some("a@b".to_string()));
    }

    #[test]
    fn from_accepts_bare_address() {
        assert_eq!(parse_from("FROM:a@b"), Some("a@b".to_string()));
    }

    #[test]
    fn to_is_case_insensitive_on_verb() {
        assert_eq!(parse_to("to:<A@B.C>"), Some("A@B.C".to_string()));
    }

    #[test]
    fn rejects_malformed_parameter() {
        assert_eq!(parse_from("FROM:not-an-address"), None);
        assert_eq!(parse_to("TO:"), None);
    }

    #[test]
    fn round_trip_matches_invariant_examples() {
        for input in ["<a@b>", "a@b"] {
            assert_eq!(parse_from(&format!("FROM:{input}")), Some("a@b".to_string()));
        }
        assert_eq!(parse_from("FROM:<A@B.C>"), Some("A@B.C".to_string()));
    }
}
