use std::collections::HashMap;
use std::path::PathBuf;

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Persisted login identity. Stores only a password hash, never the raw
/// password. `name` keeps the capitalization used at creation; lookups are
/// case-insensitive (the store is keyed on the lowercased name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRec {
    pub name: String,
    #[serde(default)]
    pub pw_hash: Option<String>,
    /// Owned character names, in creation order. Order is part of the
    /// contract: the account menu selects by position.
    #[serde(default)]
    pub characters: Vec<String>,
    pub created_unix: u64,
}

/// Account names: 4-12 chars, alphanumeric, first char alphabetic.
pub fn check_account_name(name: &str) -> bool {
    let b = name.as_bytes();
    if b.len() < 4 || b.len() > 12 {
        return false;
    }
    if !b[0].is_ascii_alphabetic() {
        return false;
    }
    b[1..].iter().all(|c| c.is_ascii_alphanumeric())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| GateError::Credential(format!("hash_password failed: {e}")))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// On-disk account store: one pretty JSON file, saved atomically via a tmp
/// file and rename.
#[derive(Debug)]
pub struct AccountStore {
    path: PathBuf,
    by_name: HashMap<String, AccountRec>,
}

impl AccountStore {
    pub fn load(path: PathBuf) -> Self {
        let mut by_name = HashMap::new();
        if let Ok(s) = std::fs::read_to_string(&path) {
            if let Ok(v) = serde_json::from_str::<Vec<AccountRec>>(&s) {
                for a in v {
                    by_name.insert(a.name.to_ascii_lowercase(), a);
                }
            }
        }
        Self { path, by_name }
    }

    pub fn save(&self) -> Result<()> {
        let mut v = self.by_name.values().cloned().collect::<Vec<_>>();
        v.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        let s = serde_json::to_string_pretty(&v)?;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&AccountRec> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AccountRec> {
        self.by_name.get_mut(&name.to_ascii_lowercase())
    }

    pub fn insert(&mut self, rec: AccountRec) {
        self.by_name.insert(rec.name.to_ascii_lowercase(), rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rule_accepts_valid_names() {
        for n in ["alfa", "bob12", "A1b2c3d4e5f6", "Zebra"] {
            assert!(check_account_name(n), "{n} should be accepted");
        }
    }

    #[test]
    fn name_rule_rejects_bad_names() {
        // too short / too long
        assert!(!check_account_name("abc"));
        assert!(!check_account_name("a234567890123"));
        // first char must be alphabetic
        assert!(!check_account_name("1bcd"));
        assert!(!check_account_name("_bcd"));
        // alphanumeric only
        assert!(!check_account_name("ab cd"));
        assert!(!check_account_name("ab-cd"));
        assert!(!check_account_name(""));
    }

    #[test]
    fn password_hash_round_trip() {
        let h = hash_password("secret").unwrap();
        assert!(verify_password(&h, "secret"));
        assert!(!verify_password(&h, "Secret"));
        assert!(!verify_password("not a phc string", "secret"));
    }

    #[test]
    fn store_save_and_reload_preserves_character_order() {
        let path = std::env::temp_dir().join(format!(
            "gatekeeper-acct-test-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut st = AccountStore::load(path.clone());
        st.insert(AccountRec {
            name: "Bob12".to_string(),
            pw_hash: None,
            characters: vec!["Zil".to_string(), "Ara".to_string()],
            created_unix: 7,
        });
        st.save().unwrap();

        let st2 = AccountStore::load(path.clone());
        let rec = st2.get("bob12").unwrap();
        assert_eq!(rec.name, "Bob12");
        assert_eq!(rec.characters, vec!["Zil", "Ara"]);

        let _ = std::fs::remove_file(&path);
    }
}
