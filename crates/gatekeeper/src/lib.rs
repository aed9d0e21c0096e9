//! `gatekeeper`: the connection lifecycle core.
//!
//! Everything between "socket accepted" and "stably playing" lives here: the
//! per-connection input-handler stack, the prompt gate, account login and
//! creation, character selection with reconnection takeover, stepwise
//! character generation, guest provisioning, and frame recovery after a hot
//! in-place restart (copyover).
//!
//! The crate owns no sockets. The transport layer feeds decoded lines into
//! [`stack::dispatch`] and flushes [`conn::Conn::take_output`] after each
//! step; shared state (accounts, players, attachments, reservations) is
//! serialized behind the [`registry::Registry`].

pub mod account;
pub mod auth;
pub mod chargen;
pub mod conn;
pub mod copyover;
pub mod error;
pub mod events;
pub mod player;
pub mod playing;
pub mod registry;
pub mod stack;

pub use conn::{Conn, ConnId};
pub use error::{GateError, Result};
pub use registry::Registry;
pub use stack::{dispatch, Handler, StackOp};

/// Install the initial frames on a fresh connection and emit the first
/// prompt: the credential menu with the DNS wait parked on top of it.
pub fn greet(conn: &mut Conn, reg: &Registry) {
    conn.push(Box::new(auth::CredMenu::new()));
    conn.push(Box::new(auth::DnsWait));
    stack::bust_prompt(conn, reg);
}
