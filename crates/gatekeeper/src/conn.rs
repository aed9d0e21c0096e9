use std::net::IpAddr;

use bytes::{Bytes, BytesMut};
use gateio::telnet::{WILL_ECHO, WONT_ECHO};

use crate::stack::Handler;

pub type ConnId = u64;

pub fn new_conn_id() -> ConnId {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("getrandom");
    u64::from_be_bytes(b)
}

/// One network-attached session.
///
/// The transport task owns the `Conn`; everything shared with other
/// connections goes through the [`crate::Registry`]. Output accumulates in
/// `out` during a processing step and is flushed by the transport once per
/// step via [`Conn::take_output`].
pub struct Conn {
    id: ConnId,
    peer: IpAddr,
    host: String,
    pub(crate) stack: Vec<Box<dyn Handler>>,
    out: BytesMut,
    echo_suppressed: bool,
    closed: bool,
    account: Option<String>,
    character: Option<String>,
    reserved_player: Option<String>,
}

impl Conn {
    pub fn new(peer: IpAddr) -> Self {
        Self::with_id(new_conn_id(), peer)
    }

    /// Used by copyover recovery, which re-creates connections under their
    /// pre-restart ids.
    pub fn with_id(id: ConnId, peer: IpAddr) -> Self {
        Self {
            id,
            peer,
            host: peer.to_string(),
            stack: Vec::new(),
            out: BytesMut::with_capacity(1024),
            echo_suppressed: false,
            closed: false,
            account: None,
            character: None,
            reserved_player: None,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// Remote host string; the textual IP until resolution completes.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: String) {
        self.host = host;
    }

    /// Coarse state of the connection, read off the top frame. Collaborators
    /// use this instead of inspecting the stack ("is this socket in game?").
    pub fn label(&self) -> &'static str {
        self.stack.last().map(|f| f.label()).unwrap_or("closed")
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Install a new top frame; the previous top goes dormant until
    /// everything above it is popped.
    pub fn push(&mut self, frame: Box<dyn Handler>) {
        self.stack.push(frame);
    }

    /// Remove the top frame. Silent no-op if that would empty the stack:
    /// callers must either leave a frame beneath or close the connection.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Append a text line: bare `\n` normalized to `\r\n`, terminator added.
    pub fn send(&mut self, text: &str) {
        let mut last = 0u8;
        for &b in text.as_bytes() {
            if b == b'\n' && last != b'\r' {
                self.out.extend_from_slice(b"\r\n");
            } else {
                self.out.extend_from_slice(&[b]);
            }
            last = b;
        }
        self.out.extend_from_slice(b"\r\n");
    }

    /// Append raw bytes (prompts, telnet sequences) with no normalization.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Drain the output accumulated this step.
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Ask the remote terminal to stop or resume local echo. Emits the
    /// 3-byte IAC sequence only on state changes, so repeated requests from
    /// nested password frames stay idempotent.
    pub fn set_echo_suppressed(&mut self, suppress: bool) {
        if suppress == self.echo_suppressed {
            return;
        }
        self.echo_suppressed = suppress;
        if suppress {
            self.out.extend_from_slice(&WILL_ECHO);
        } else {
            self.out.extend_from_slice(&WONT_ECHO);
        }
    }

    pub fn echo_suppressed(&self) -> bool {
        self.echo_suppressed
    }

    /// Mark the connection closed and drop all frames. Echo is restored
    /// first: a close out of a password frame must not leave the remote
    /// terminal with local echo off. The transport sees `is_closed` after
    /// the current step and terminates.
    pub fn close(&mut self) {
        self.set_echo_suppressed(false);
        self.closed = true;
        self.stack.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn set_account(&mut self, name: String) {
        self.account = Some(name);
    }

    pub fn take_account(&mut self) -> Option<String> {
        self.account.take()
    }

    pub fn character(&self) -> Option<&str> {
        self.character.as_deref()
    }

    pub fn set_character(&mut self, name: String) {
        self.character = Some(name);
    }

    pub fn take_character(&mut self) -> Option<String> {
        self.character.take()
    }

    /// Name held by an in-progress character creation on this connection.
    /// Tracked so teardown can release the reservation if the creation never
    /// finishes.
    pub fn set_reserved_player(&mut self, name: String) {
        self.reserved_player = Some(name);
    }

    pub fn take_reserved_player(&mut self) -> Option<String> {
        self.reserved_player.take()
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("label", &self.label())
            .field("depth", &self.stack.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_normalizes_newlines() {
        let mut c = Conn::new("127.0.0.1".parse().unwrap());
        c.send("a\nb");
        assert_eq!(&c.take_output()[..], b"a\r\nb\r\n");
        c.send("x\r\ny");
        assert_eq!(&c.take_output()[..], b"x\r\ny\r\n");
    }

    #[test]
    fn echo_toggle_is_edge_triggered_and_bit_exact() {
        let mut c = Conn::new("127.0.0.1".parse().unwrap());
        c.set_echo_suppressed(true);
        c.set_echo_suppressed(true);
        assert_eq!(&c.take_output()[..], &[255u8, 251, 1][..]);
        c.set_echo_suppressed(false);
        assert_eq!(&c.take_output()[..], &[255u8, 252, 1][..]);
    }

    #[test]
    fn close_restores_echo() {
        let mut c = Conn::new("127.0.0.1".parse().unwrap());
        c.set_echo_suppressed(true);
        c.take_output();

        c.close();
        assert!(!c.echo_suppressed());
        assert_eq!(&c.take_output()[..], &WONT_ECHO[..]);

        // Closing with echo already on emits nothing.
        let mut c = Conn::new("127.0.0.1".parse().unwrap());
        c.close();
        assert!(!c.has_output());
    }
}
