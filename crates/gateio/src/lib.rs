//! `gateio`: telnet-aware line transport helpers.
//!
//! This crate intentionally avoids tokio-util's codecs and implements just
//! what the login gate needs:
//! - incremental CRLF/LF line splitting without copying
//!   (`BytesMut::split_to(..).freeze()`),
//! - IAC negotiation stripping with the exact WILL/WONT ECHO sequences used
//!   to squelch password entry on standard telnet clients.

pub mod line;
pub mod telnet;
