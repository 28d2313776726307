//! Canonical SMTP reply codes used by the engine (C1).
//!
//! Names map 1:1 to RFC 5321 semantics. No behavior lives here beyond naming.

pub const SMTP_STATUS: u16 = 211;
pub const SMTP_HELP: u16 = 214;
pub const SMTP_READY: u16 = 220;
pub const SMTP_CLOSING: u16 = 221;
pub const SMTP_COMPLETED: u16 = 250;
pub const SMTP_NONLOCAL_USER: u16 = 251;
pub const SMTP_PROCEED: u16 = 354;
pub const SMTP_UNAVAIL: u16 = 421;
pub const SMTP_MAILBOX_UNAVAIL: u16 = 450;
pub const SMTP_LOCALERR: u16 = 451;
pub const SMTP_SERVER_FULL: u16 = 452;
pub const SMTP_SYNTAX_ERROR: u16 = 500;
pub const SMTP_PARAMETER_ERROR: u16 = 501;
pub const SMTP_NOT_IMPLEMENTED: u16 = 502;
pub const SMTP_BAD_SEQUENCE: u16 = 503;
pub const SMTP_PARAMETER_NOT_IMPLEMENTED: u16 = 504;
pub const SMTP_NONMAIL_DOMAIN: u16 = 521;
pub const SMTP_ACCESS_DENIED: u16 = 530;
pub const SMTP_BAD_AUTH: u16 = 535;
pub const SMTP_NO_ACTION_MAILBOX_UNAVAIL: u16 = 550;
pub const SMTP_PLEASE_FORWARD: u16 = 551;
pub const SMTP_MESSAGE_TOO_BIG: u16 = 552;
pub const SMTP_ILLEGAL_MAILBOX_NAME: u16 = 553;
pub const SMTP_TRANSACTION_FAILED: u16 = 554;
