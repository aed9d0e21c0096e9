//! Stepwise character generation and guest provisioning.
//!
//! Each question is its own frame; answering replaces it with the next one,
//! carrying the answers so far by value. The chosen name is reserved the
//! moment it is accepted and released when the character is finished or the
//! connection goes away, so two connections can never build the same name in
//! parallel.

use bytes::Bytes;
use tracing::info;

use crate::conn::Conn;
use crate::player::{capitalize, check_player_name, PlayerRec, RACE_TOKENS, SEX_TOKENS};
use crate::playing;
use crate::registry::Registry;
use crate::stack::{Handler, StackOp};

/// First question: the character's name.
pub struct ChargenName;

impl Handler for ChargenName {
    fn label(&self) -> &'static str {
        "chargen"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        let raw = line.trim();
        if !check_player_name(raw) {
            conn.send("Illegal name, try again.");
            return Vec::new();
        }
        let name = capitalize(raw);
        if let Err(e) = reg.reserve_player_name(&name) {
            conn.send(&format!("{e}, try another."));
            return Vec::new();
        }
        conn.set_reserved_player(name.clone());
        vec![StackOp::Pop, StackOp::Push(Box::new(ChargenSex { name }))]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"What is your character's name? ")
    }
}

pub struct ChargenSex {
    name: String,
}

impl Handler for ChargenSex {
    fn label(&self) -> &'static str {
        "chargen"
    }

    fn consume(&mut self, conn: &mut Conn, _reg: &Registry, line: &str) -> Vec<StackOp> {
        let pick = line.trim();
        let Some((_, sex)) = SEX_TOKENS
            .iter()
            .find(|(tok, full)| pick.eq_ignore_ascii_case(tok) || pick.eq_ignore_ascii_case(full))
        else {
            conn.send("Invalid sex, try again.");
            return Vec::new();
        };
        vec![
            StackOp::Pop,
            StackOp::Push(Box::new(ChargenRace {
                name: std::mem::take(&mut self.name),
                sex: sex.to_string(),
            })),
        ]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"What is your sex (M/F/N)? ")
    }
}

pub struct ChargenRace {
    name: String,
    sex: String,
}

impl Handler for ChargenRace {
    fn label(&self) -> &'static str {
        "chargen"
    }

    fn consume(&mut self, conn: &mut Conn, _reg: &Registry, line: &str) -> Vec<StackOp> {
        let pick = line.trim();
        let Some(race) = RACE_TOKENS.iter().find(|r| pick.eq_ignore_ascii_case(r)) else {
            conn.send("Invalid race, try again.");
            return Vec::new();
        };
        vec![
            StackOp::Pop,
            StackOp::Push(Box::new(ChargenFinish {
                name: std::mem::take(&mut self.name),
                sex: std::mem::take(&mut self.sex),
                race: race.to_string(),
            })),
        ]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from(format!("What is your race ({})? ", RACE_TOKENS.join(", ")))
    }
}

/// Final confirmation. Any input commits the character: the record is saved,
/// the name moves from the reservation table onto the owning account, and
/// the character enters the world.
pub struct ChargenFinish {
    name: String,
    sex: String,
    race: String,
}

impl Handler for ChargenFinish {
    fn label(&self) -> &'static str {
        "chargen"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, _line: &str) -> Vec<StackOp> {
        let rec = PlayerRec::new(
            std::mem::take(&mut self.name),
            std::mem::take(&mut self.sex),
            std::mem::take(&mut self.race),
        );

        if let Err(e) = reg.save_player(&rec) {
            conn.send(&format!("Your character could not be saved: {e}"));
            conn.take_reserved_player();
            reg.release_player_name(&rec.name);
            return vec![StackOp::Pop];
        }
        if let Some(acct) = conn.account().map(str::to_string) {
            if let Err(e) = reg.add_account_character(&acct, &rec.name) {
                tracing::warn!(account = %acct, character = %rec.name, err = %e,
                    "could not record character on account");
            }
        }
        conn.take_reserved_player();
        reg.release_player_name(&rec.name);
        info!(conn = conn.id(), character = %rec.name, "character created");

        let frame = playing::enter_game(conn, reg, rec, true);
        vec![StackOp::Pop, StackOp::Push(frame)]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"*** Press enter to enter the game ***\r\n")
    }
}

/// Generate an unclaimed guest name and put the throwaway character straight
/// into the world. Guests carry the default group but are never persisted.
/// Returns the playing frame for the caller to place.
#[must_use]
pub fn enter_as_guest(conn: &mut Conn, reg: &Registry) -> Box<dyn Handler> {
    let name = loop {
        let mut b = [0u8; 2];
        getrandom::getrandom(&mut b).expect("getrandom");
        let n = u16::from_be_bytes(b) % 10_000;
        let candidate = format!("Guest{n:04}");
        if !reg.player_exists(&candidate) && !reg.player_creating(&candidate) {
            break candidate;
        }
    };
    let mut rec = PlayerRec::new(name, "neutral".to_string(), "human".to_string());
    rec.guest = true;
    playing::enter_game(conn, reg, rec, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::dispatch;

    fn test_registry(tag: &str) -> Registry {
        let dir = std::env::temp_dir().join(format!(
            "gatekeeper-chargen-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        Registry::open(dir.join("accounts.json"), dir.join("players"))
    }

    fn conn() -> Conn {
        Conn::new("127.0.0.1".parse().unwrap())
    }

    fn out(c: &mut Conn) -> String {
        String::from_utf8_lossy(&c.take_output()).into_owned()
    }

    #[test]
    fn full_creation_walk() {
        let reg = test_registry("walk");
        reg.create_account("bob12", "secret").unwrap();

        let mut c = conn();
        c.set_account("bob12".to_string());
        c.push(Box::new(ChargenName));

        dispatch(&mut c, &reg, "zil");
        assert!(reg.player_creating("Zil"));
        assert!(out(&mut c).contains("sex"));

        dispatch(&mut c, &reg, "f");
        assert!(out(&mut c).contains("race"));

        dispatch(&mut c, &reg, "ELF");
        assert!(out(&mut c).contains("enter the game"));

        dispatch(&mut c, &reg, "");
        assert_eq!(c.label(), "playing");
        assert!(!reg.player_creating("Zil"));
        assert_eq!(reg.driver_of("zil"), Some(c.id()));

        let saved = reg.load_player("zil").unwrap();
        assert_eq!(saved.sex, "female");
        assert_eq!(saved.race, "elf");
        assert!(!saved.guest);
        assert_eq!(reg.account_characters("bob12"), vec!["Zil"]);
    }

    #[test]
    fn bad_answers_keep_the_frame() {
        let reg = test_registry("retry");
        let mut c = conn();
        c.push(Box::new(ChargenName));

        dispatch(&mut c, &reg, "x");
        assert!(out(&mut c).contains("Illegal name"));
        dispatch(&mut c, &reg, "zil2");
        assert!(out(&mut c).contains("Illegal name"));
        assert_eq!(c.label(), "chargen");
        assert_eq!(c.stack_depth(), 1);
    }

    #[test]
    fn taken_and_in_progress_names_are_refused() {
        let reg = test_registry("taken");
        reg.save_player(&PlayerRec::new(
            "Ara".to_string(),
            "male".to_string(),
            "dwarf".to_string(),
        ))
        .unwrap();
        reg.reserve_player_name("Vex").unwrap();

        let mut c = conn();
        c.push(Box::new(ChargenName));
        dispatch(&mut c, &reg, "ara");
        assert!(out(&mut c).contains("try another"));
        dispatch(&mut c, &reg, "vex");
        assert!(out(&mut c).contains("try another"));
        assert_eq!(c.label(), "chargen");
    }

    #[test]
    fn disconnect_mid_creation_releases_the_name() {
        let reg = test_registry("abandon");
        let mut c = conn();
        c.push(Box::new(ChargenName));
        dispatch(&mut c, &reg, "zil");
        assert!(reg.player_creating("zil"));

        reg.disconnect(&mut c);
        assert!(!reg.player_creating("zil"));
        assert!(reg.reserve_player_name("zil").is_ok());
    }

    #[test]
    fn guests_enter_without_a_record() {
        let reg = test_registry("guest");
        let mut c = conn();
        let f = enter_as_guest(&mut c, &reg);
        c.push(f);

        let name = c.character().unwrap().to_string();
        assert!(name.starts_with("Guest"));
        assert_eq!(c.label(), "playing");
        let live = reg.live_player(&name).unwrap();
        assert!(live.guest);

        // Gone without a trace after extraction.
        reg.extract(&name).unwrap();
        assert!(reg.load_player(&name).is_err());
    }
}
