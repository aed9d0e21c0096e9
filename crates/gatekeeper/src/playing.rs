//! The in-game frame and world entry/re-entry helpers.
//!
//! Gameplay itself lives behind the [`Dispatch`] seam: once a character is
//! in the world, every non-`quit` line is handed to the installed command
//! dispatcher. The frame below stays where it was, so the stack reads
//! "menu, playing" for an account character and "playing" alone for guests.

use bytes::Bytes;

use tracing::{info, warn};

use crate::conn::Conn;
use crate::events::Event;
use crate::player::PlayerRec;
use crate::registry::Registry;
use crate::stack::{Handler, StackOp};

/// Command-handling seam between the lifecycle controller and the game
/// proper. Installed once at startup via [`Registry::set_dispatcher`].
pub trait Dispatch: Send + Sync {
    fn command(&self, conn: &mut Conn, reg: &Registry, line: &str);
}

/// Default dispatcher until the game installs a real one.
pub struct NullDispatch;

impl Dispatch for NullDispatch {
    fn command(&self, conn: &mut Conn, _reg: &Registry, line: &str) {
        if !line.trim().is_empty() {
            conn.send("Huh?");
        }
    }
}

/// Top frame while a character is in the world.
pub struct Playing;

impl Handler for Playing {
    fn label(&self) -> &'static str {
        "playing"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            if let Some(ch) = conn.take_character() {
                if let Err(e) = reg.extract(&ch) {
                    warn!(character = %ch, err = %e, "extract on quit failed");
                }
            }
            conn.send("Goodbye!");
            return vec![StackOp::Close];
        }
        let d = reg.dispatcher();
        d.command(conn, reg, line);
        Vec::new()
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"> ")
    }
}

/// Put a character into the world driven by this connection. `fresh` marks a
/// character that has never entered the world before (first-login setup runs
/// once). Returns the playing frame; the caller decides where it lands on
/// the stack (on top of a menu, or replacing a one-shot frame).
#[must_use]
pub fn enter_game(conn: &mut Conn, reg: &Registry, rec: PlayerRec, fresh: bool) -> Box<dyn Handler> {
    let name = rec.name.clone();
    conn.set_character(name.clone());
    if let Some(old) = reg.enter_world(rec, conn.id()) {
        // Another connection raced us onto the same character between the
        // menu's driver check and the attach; it loses.
        reg.send_to(
            old,
            Bytes::from(format!(
                "This character has been taken over from {}.\r\n",
                conn.host()
            )),
        );
        reg.kill_conn(old);
        info!(conn = conn.id(), character = %name, kicked = old, "takeover");
    }
    info!(conn = conn.id(), character = %name, fresh, "entering world");

    conn.send(&format!("Welcome to the world, {name}!"));
    if fresh {
        reg.fire(Event::InitPlayer { name: name.clone() });
    }
    reg.fire(Event::Enter { name: name.clone() });

    let d = reg.dispatcher();
    d.command(conn, reg, "look");
    Box::new(Playing)
}

/// Attach this connection to a character already in the world, kicking the
/// previous driver. Returns the playing frame, or `None` if the character is
/// no longer live (the caller falls back to a normal load).
#[must_use]
pub fn reconnect_game(conn: &mut Conn, reg: &Registry, name: &str) -> Option<Box<dyn Handler>> {
    let Some(rec) = reg.live_player(name) else {
        return None;
    };
    let old = reg.take_over(&rec.name, conn.id());
    if let Some(old) = old {
        reg.send_to(
            old,
            Bytes::from(format!(
                "This character has been taken over from {}.\r\n",
                conn.host()
            )),
        );
        reg.kill_conn(old);
        info!(conn = conn.id(), character = %rec.name, kicked = old, "takeover");
    }

    let name = rec.name.clone();
    conn.set_character(name.clone());
    conn.send(&format!("You take over {name}, already in the world."));
    reg.fire(Event::Reconnect { name });

    let d = reg.dispatcher();
    d.command(conn, reg, "look");
    Some(Box::new(Playing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnHandle;
    use crate::stack::dispatch;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn test_registry(tag: &str) -> Registry {
        let dir = std::env::temp_dir().join(format!(
            "gatekeeper-playing-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        Registry::open(dir.join("accounts.json"), dir.join("players"))
    }

    fn conn() -> Conn {
        Conn::new("127.0.0.1".parse().unwrap())
    }

    fn rec(name: &str) -> PlayerRec {
        PlayerRec::new(name.to_string(), "female".to_string(), "elf".to_string())
    }

    struct Recorder(Arc<Mutex<Vec<String>>>);
    impl Dispatch for Recorder {
        fn command(&self, _conn: &mut Conn, _reg: &Registry, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn enter_game_fires_events_and_looks() {
        let reg = test_registry("enter");
        let seen = Arc::new(Mutex::new(Vec::new()));
        reg.set_dispatcher(Arc::new(Recorder(seen.clone())));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        reg.subscribe(Box::new(move |ev| {
            let n = f.load(Ordering::SeqCst);
            match (n, ev) {
                (0, Event::InitPlayer { name }) if name == "Zil" => {}
                (1, Event::Enter { name }) if name == "Zil" => {}
                other => panic!("unexpected event order: {other:?}"),
            }
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let mut c = conn();
        let f = enter_game(&mut c, &reg, rec("Zil"), true);
        c.push(f);

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(c.label(), "playing");
        assert_eq!(c.character(), Some("Zil"));
        assert_eq!(reg.driver_of("zil"), Some(c.id()));
        assert_eq!(seen.lock().unwrap().as_slice(), ["look"]);
    }

    #[test]
    fn quit_extracts_and_closes() {
        let reg = test_registry("quit");
        let mut c = conn();
        let f = enter_game(&mut c, &reg, rec("Zil"), false);
        c.push(f);
        c.take_output();

        dispatch(&mut c, &reg, "quit");
        assert!(c.is_closed());
        assert!(reg.driver_of("zil").is_none());
        // A persisted character survives quit on disk.
        assert!(reg.load_player("zil").is_ok());
    }

    #[test]
    fn non_quit_lines_go_to_the_dispatcher() {
        let reg = test_registry("cmd");
        let seen = Arc::new(Mutex::new(Vec::new()));
        reg.set_dispatcher(Arc::new(Recorder(seen.clone())));

        let mut c = conn();
        let f = enter_game(&mut c, &reg, rec("Zil"), false);
        c.push(f);
        dispatch(&mut c, &reg, "  say hello  ");

        assert_eq!(seen.lock().unwrap().as_slice(), ["look", "say hello"]);
        assert!(!c.is_closed());
    }

    #[test]
    fn reconnect_kicks_the_old_driver() {
        let reg = test_registry("reconnect");

        let mut old = conn();
        let f = enter_game(&mut old, &reg, rec("Zil"), false);
        old.push(f);
        let (write_tx, mut write_rx) = tokio::sync::mpsc::channel(8);
        let (kill_tx, kill_rx) = tokio::sync::watch::channel(false);
        reg.register_conn(
            old.id(),
            ConnHandle {
                write_tx,
                kill_tx,
                fd: None,
                peer: "127.0.0.1".parse().unwrap(),
                host: "old.example.net".to_string(),
            },
        );

        let mut newc = conn();
        let f = reconnect_game(&mut newc, &reg, "zil").unwrap();
        newc.push(f);

        assert_eq!(reg.driver_of("zil"), Some(newc.id()));
        assert!(*kill_rx.borrow());
        let notice = write_rx.try_recv().unwrap();
        assert!(String::from_utf8_lossy(&notice).contains("taken over"));
        assert_eq!(newc.character(), Some("Zil"));
        assert_eq!(newc.label(), "playing");
    }

    #[test]
    fn racing_entries_leave_exactly_one_driver() {
        let reg = test_registry("race");

        let mut first = conn();
        let f = enter_game(&mut first, &reg, rec("Zil"), false);
        first.push(f);
        let (write_tx, mut write_rx) = tokio::sync::mpsc::channel(8);
        let (kill_tx, kill_rx) = tokio::sync::watch::channel(false);
        reg.register_conn(
            first.id(),
            ConnHandle {
                write_tx,
                kill_tx,
                fd: None,
                peer: "127.0.0.1".parse().unwrap(),
                host: "first.example.net".to_string(),
            },
        );

        // A second connection whose menu check ran before the first attach
        // landed picks the same character.
        let mut second = conn();
        let f = enter_game(&mut second, &reg, rec("Zil"), false);
        second.push(f);

        assert_eq!(reg.driver_of("zil"), Some(second.id()));
        assert!(*kill_rx.borrow(), "displaced driver must be kicked");
        let notice = write_rx.try_recv().unwrap();
        assert!(String::from_utf8_lossy(&notice).contains("taken over"));

        // The kicked transport's teardown must not extract the character.
        reg.disconnect(&mut first);
        assert_eq!(reg.driver_of("zil"), Some(second.id()));
    }

    #[test]
    fn reconnect_fails_when_nobody_is_live() {
        let reg = test_registry("stale");
        let mut c = conn();
        assert!(reconnect_game(&mut c, &reg, "Zil").is_none());
        assert_eq!(c.stack_depth(), 0);
    }
}
