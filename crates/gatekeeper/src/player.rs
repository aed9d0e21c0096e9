use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Sexes offered during character generation.
pub const SEX_TOKENS: [(&str, &str); 3] = [("M", "male"), ("F", "female"), ("N", "neutral")];

pub const RACE_TOKENS: [&str; 6] = ["dwarf", "elf", "gnome", "halfling", "human", "orc"];

/// Group every ordinary player belongs to; lockdown checks test against it
/// when deciding whether account creation, character creation, or guest
/// entry is currently allowed.
pub const DFLT_USER_GROUP: &str = "player";

/// A playable avatar. Guests are transient: never added to an account's
/// character list and never written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRec {
    pub name: String,
    pub sex: String,
    pub race: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub guest: bool,
    pub created_unix: u64,
}

impl PlayerRec {
    pub fn new(name: String, sex: String, race: String) -> Self {
        Self {
            name,
            sex,
            race,
            groups: vec![DFLT_USER_GROUP.to_string()],
            guest: false,
            created_unix: now_unix(),
        }
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Character names: 3-12 chars, purely alphabetic.
pub fn check_player_name(name: &str) -> bool {
    let b = name.as_bytes();
    (3..=12).contains(&b.len()) && b.iter().all(|c| c.is_ascii_alphabetic())
}

/// "zil" -> "Zil". Applied once a character name is accepted.
pub fn capitalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    if let Some(c) = chars.next() {
        out.extend(c.to_uppercase());
    }
    out.extend(chars.flat_map(|c| c.to_lowercase()));
    out
}

/// On-disk player store: one JSON file per character, keyed by lowercase
/// name. Same atomic tmp + rename discipline as the account store.
#[derive(Debug)]
pub struct PlayerStore {
    dir: PathBuf,
}

impl PlayerStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name.to_ascii_lowercase()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub fn load(&self, name: &str) -> Result<PlayerRec> {
        let s = std::fs::read_to_string(self.path_for(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GateError::NotFound
            } else {
                GateError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn save(&self, rec: &PlayerRec) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&rec.name);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(rec)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_name_rule() {
        assert!(check_player_name("Zil"));
        assert!(check_player_name("abcdefghijkl"));
        assert!(!check_player_name("ab"));
        assert!(!check_player_name("abcdefghijklm"));
        assert!(!check_player_name("zil2"));
        assert!(!check_player_name("zil bar"));
    }

    #[test]
    fn capitalizes_accepted_names() {
        assert_eq!(capitalize("zil"), "Zil");
        assert_eq!(capitalize("ZIL"), "Zil");
        assert_eq!(capitalize("zIL"), "Zil");
    }

    #[test]
    fn store_round_trip_and_missing_record() {
        let dir = std::env::temp_dir().join(format!(
            "gatekeeper-player-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let st = PlayerStore::new(dir.clone());
        assert!(matches!(st.load("nobody"), Err(GateError::NotFound)));

        let rec = PlayerRec::new("Zil".to_string(), "female".to_string(), "elf".to_string());
        st.save(&rec).unwrap();
        assert!(st.exists("ZIL"));
        let back = st.load("zil").unwrap();
        assert_eq!(back.name, "Zil");
        assert_eq!(back.groups, vec![DFLT_USER_GROUP]);
        assert!(!back.guest);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
