//! A minimal in-world command set behind the gatekeeper's dispatcher seam.
//!
//! Enough of a world to exercise the lifecycle: a room to look at, a who
//! list, say, and the copyover trigger. A real game replaces this wholesale
//! via [`gatekeeper::Registry::set_dispatcher`].

use bytes::Bytes;
use gatekeeper::playing::Dispatch;
use gatekeeper::{Conn, Registry};
use tokio::sync::mpsc;

pub struct GameDispatch {
    copyover_tx: mpsc::Sender<()>,
}

impl GameDispatch {
    pub fn new(copyover_tx: mpsc::Sender<()>) -> Self {
        Self { copyover_tx }
    }
}

impl Dispatch for GameDispatch {
    fn command(&self, conn: &mut Conn, reg: &Registry, line: &str) {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        match verb.as_str() {
            "" => {}
            "look" => {
                conn.send("The Landing");
                conn.send("A quiet stone chamber where new arrivals appear.");
            }
            "who" => {
                let names = reg.who_is_playing();
                conn.send(&format!("{} player(s) in the world:", names.len()));
                for n in names {
                    conn.send(&format!("  {n}"));
                }
            }
            "say" => {
                let msg = words.collect::<Vec<_>>().join(" ");
                if msg.is_empty() {
                    conn.send("Say what?");
                    return;
                }
                let speaker = conn.character().unwrap_or("Someone").to_string();
                conn.send(&format!("You say, '{msg}'"));
                for s in reg.snapshot_conns() {
                    if s.id != conn.id() && s.character.is_some() {
                        reg.send_to(s.id, Bytes::from(format!("{speaker} says, '{msg}'\r\n")));
                    }
                }
            }
            "copyover" => {
                // Same trust boundary as the rest of the admin surface.
                if !conn.peer().is_loopback() {
                    conn.send("Huh?");
                    return;
                }
                conn.send("Initiating copyover.");
                let _ = self.copyover_tx.try_send(());
            }
            _ => conn.send("Huh?"),
        }
    }
}
