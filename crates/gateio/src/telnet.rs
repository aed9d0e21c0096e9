//! Telnet IAC parsing and echo control.
//!
//! The parser strips IAC sequences from the inbound byte stream and generates
//! "refuse everything" negotiation replies, with one carve-out: the server
//! drives the ECHO option itself (WILL/WONT around password prompts), so
//! DO/DONT ECHO from the peer are acknowledgements and must not be answered,
//! or the refusal would immediately re-enable local echo.
//!
//! Subnegotiation blocks (`IAC SB ... IAC SE`) are stripped as well.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// Telnet ECHO option (RFC 857).
pub const OPT_ECHO: u8 = 1;

/// Sent before a password prompt: "I will echo" makes a compliant client
/// stop echoing locally. Bit-exact; standard clients depend on it.
pub const WILL_ECHO: [u8; 3] = [IAC, WILL, OPT_ECHO];

/// Sent after password entry to restore client-side echo.
pub const WONT_ECHO: [u8; 3] = [IAC, WONT, OPT_ECHO];

#[derive(Debug, Default)]
pub struct IacParser {
    state: State,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate {
        cmd: u8,
    },
    Subneg {
        opt: Option<u8>,
        iac_seen: bool,
    },
}

impl IacParser {
    pub fn new() -> Self {
        Self { state: State::Data }
    }

    /// Parse a chunk of bytes, returning `(data, replies)`:
    /// - `data`: the stream with IAC sequences removed
    /// - `replies`: bytes to write back to the telnet peer (may be empty)
    pub fn parse(&mut self, chunk: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut out = Vec::with_capacity(chunk.len());
        let mut replies = Vec::new();

        for b in chunk {
            match &mut self.state {
                State::Data => {
                    if *b == IAC {
                        self.state = State::Iac;
                    } else {
                        out.push(*b);
                    }
                }
                State::Iac => {
                    match *b {
                        // Escaped 0xff => literal 0xff.
                        IAC => {
                            out.push(IAC);
                            self.state = State::Data;
                        }
                        // Negotiation commands are 3 bytes: IAC <cmd> <opt>
                        DO | DONT | WILL | WONT => {
                            self.state = State::Negotiate { cmd: *b };
                        }
                        // Subnegotiation: IAC SB <opt> ... IAC SE
                        SB => {
                            self.state = State::Subneg {
                                opt: None,
                                iac_seen: false,
                            };
                        }
                        // Other 2-byte IAC commands (NOP, GA, etc.) - ignore.
                        _ => {
                            self.state = State::Data;
                        }
                    }
                }
                State::Negotiate { cmd } => {
                    let opt = *b;
                    match (*cmd, opt) {
                        // Peer acknowledging our WILL/WONT ECHO; stay quiet.
                        (DO, OPT_ECHO) | (DONT, OPT_ECHO) => {}
                        // "Please do X" => "No thanks".
                        (DO, _) => replies.extend_from_slice(&[IAC, WONT, opt]),
                        // "I will do X" => "Please don't".
                        (WILL, _) => replies.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    self.state = State::Data;
                }
                State::Subneg { opt, iac_seen } => {
                    if opt.is_none() {
                        *opt = Some(*b);
                        continue;
                    }

                    if *iac_seen {
                        // Only SE ends the block; anything else (including an
                        // escaped IAC) stays inside it.
                        if *b == SE {
                            self.state = State::Data;
                        } else {
                            *iac_seen = false;
                        }
                        continue;
                    }

                    if *b == IAC {
                        *iac_seen = true;
                    }
                }
            }
        }

        (out, replies)
    }
}
