//! Process-scoped shared state, serialized behind one mutex.
//!
//! Attach/detach, name reservations, and store mutation are all
//! check-then-set operations that two connections can legitimately race
//! (loading the same character, claiming the same new name), so every
//! accessor here takes the lock for the whole check-then-set. Nothing holds
//! the lock across slow work: password hashing and record writes happen
//! outside it, with availability re-checked on commit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::account::{self, AccountRec, AccountStore};
use crate::conn::{Conn, ConnId};
use crate::error::{GateError, Result};
use crate::events::{Event, Listener};
use crate::player::{now_unix, PlayerRec, PlayerStore};
use crate::playing::{Dispatch, NullDispatch};

/// Transport-side handle to a live connection, for takeover kicks, direct
/// writes from other sessions, and copyover snapshots.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub write_tx: mpsc::Sender<Bytes>,
    pub kill_tx: watch::Sender<bool>,
    /// Raw socket fd, recorded at accept so a copyover can re-exec with it.
    pub fd: Option<i32>,
    pub peer: std::net::IpAddr,
    pub host: String,
}

/// Per-connection copyover snapshot row; see [`crate::copyover`].
#[derive(Debug, Clone)]
pub struct ConnSnapshot {
    pub id: ConnId,
    pub fd: Option<i32>,
    pub peer: std::net::IpAddr,
    pub host: String,
    pub account: Option<String>,
    pub character: Option<String>,
}

struct Inner {
    accounts: AccountStore,
    players: PlayerStore,
    creating_accounts: HashSet<String>,
    creating_players: HashSet<String>,
    account_conns: HashMap<String, ConnId>,
    char_conns: HashMap<String, ConnId>,
    live_chars: HashMap<String, PlayerRec>,
    conns: HashMap<ConnId, ConnHandle>,
    lockdown: String,
}

pub struct Registry {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Listener>>,
    dispatcher: Mutex<Arc<dyn Dispatch>>,
}

impl Registry {
    pub fn open(accounts_path: impl Into<PathBuf>, players_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                accounts: AccountStore::load(accounts_path.into()),
                players: PlayerStore::new(players_dir.into()),
                creating_accounts: HashSet::new(),
                creating_players: HashSet::new(),
                account_conns: HashMap::new(),
                char_conns: HashMap::new(),
                live_chars: HashMap::new(),
                conns: HashMap::new(),
                lockdown: String::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(Arc::new(NullDispatch)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic inside a short check-then-set
        // section; the tables are still consistent enough to continue.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- accounts ---------------------------------------------------------

    pub fn account_exists(&self, name: &str) -> bool {
        self.lock().accounts.contains(name)
    }

    pub fn account_creating(&self, name: &str) -> bool {
        self.lock()
            .creating_accounts
            .contains(&name.to_ascii_lowercase())
    }

    /// Create and persist a new account with the given password. The name is
    /// reserved before the (slow) hash runs, so a concurrent attempt on the
    /// same name observes "already creating" rather than racing the insert.
    pub fn create_account(&self, name: &str, password: &str) -> Result<AccountRec> {
        if !account::check_account_name(name) {
            return Err(GateError::BadName);
        }
        let key = name.to_ascii_lowercase();
        {
            let mut g = self.lock();
            if g.accounts.contains(name) {
                return Err(GateError::NameExists);
            }
            if !g.creating_accounts.insert(key.clone()) {
                return Err(GateError::NameCreating);
            }
        }

        let hashed = match account::hash_password(password) {
            Ok(h) => h,
            Err(e) => {
                self.lock().creating_accounts.remove(&key);
                return Err(e);
            }
        };

        let rec = AccountRec {
            name: name.to_string(),
            pw_hash: Some(hashed),
            characters: Vec::new(),
            created_unix: now_unix(),
        };
        let saved = {
            let mut g = self.lock();
            g.creating_accounts.remove(&key);
            g.accounts.insert(rec.clone());
            g.accounts.save()
        };
        if let Err(e) = saved {
            warn!(name, err = %e, "account save failed");
            return Err(e);
        }
        info!(name, "account created");
        Ok(rec)
    }

    /// Verify credentials; returns the stored record on success. The caller
    /// gets the same error for a missing account and a wrong password.
    pub fn login_account(&self, name: &str, password: &str) -> Result<AccountRec> {
        let rec = {
            let g = self.lock();
            g.accounts.get(name).cloned()
        };
        let rec = rec.ok_or(GateError::BadCredential)?;
        let Some(hash) = rec.pw_hash.as_deref() else {
            return Err(GateError::BadCredential);
        };
        if account::verify_password(hash, password) {
            Ok(rec)
        } else {
            Err(GateError::BadCredential)
        }
    }

    pub fn password_matches(&self, name: &str, password: &str) -> bool {
        let hash = {
            let g = self.lock();
            g.accounts.get(name).and_then(|r| r.pw_hash.clone())
        };
        hash.is_some_and(|h| account::verify_password(&h, password))
    }

    pub fn set_password(&self, name: &str, password: &str) -> Result<()> {
        let hashed = account::hash_password(password)?;
        let mut g = self.lock();
        let rec = g.accounts.get_mut(name).ok_or(GateError::NotFound)?;
        rec.pw_hash = Some(hashed);
        g.accounts.save()
    }

    pub fn account_characters(&self, name: &str) -> Vec<String> {
        self.lock()
            .accounts
            .get(name)
            .map(|r| r.characters.clone())
            .unwrap_or_default()
    }

    pub fn add_account_character(&self, acct: &str, character: &str) -> Result<()> {
        let mut g = self.lock();
        let rec = g.accounts.get_mut(acct).ok_or(GateError::NotFound)?;
        rec.characters.push(character.to_string());
        g.accounts.save()
    }

    pub fn save_account(&self, name: &str) -> Result<()> {
        let g = self.lock();
        if !g.accounts.contains(name) {
            return Err(GateError::NotFound);
        }
        g.accounts.save()
    }

    /// Attach an account to a connection. At most one connection may hold an
    /// account; a prior holder is silently detached (its menu is stale, but
    /// it owns no account state beyond the attachment).
    pub fn attach_account(&self, name: &str, conn: ConnId) -> Option<ConnId> {
        let mut g = self.lock();
        g.account_conns.insert(name.to_ascii_lowercase(), conn)
    }

    pub fn detach_account(&self, name: &str, conn: ConnId) {
        let key = name.to_ascii_lowercase();
        let mut g = self.lock();
        if g.account_conns.get(&key) == Some(&conn) {
            g.account_conns.remove(&key);
        }
    }

    // ---- players ----------------------------------------------------------

    /// A player name is taken if a record exists on disk or a character by
    /// that name is live in the world (guests have no record but still hold
    /// their name while connected).
    pub fn player_exists(&self, name: &str) -> bool {
        let g = self.lock();
        g.players.exists(name) || g.live_chars.contains_key(&name.to_ascii_lowercase())
    }

    pub fn player_creating(&self, name: &str) -> bool {
        self.lock()
            .creating_players
            .contains(&name.to_ascii_lowercase())
    }

    /// Reserve a player name for an in-progress creation. The reservation
    /// must be released with [`Registry::release_player_name`] on every exit
    /// path (completion, abandonment, disconnect).
    pub fn reserve_player_name(&self, name: &str) -> Result<()> {
        let key = name.to_ascii_lowercase();
        let mut g = self.lock();
        if g.players.exists(name) || g.live_chars.contains_key(&key) {
            return Err(GateError::NameExists);
        }
        if !g.creating_players.insert(key) {
            return Err(GateError::NameCreating);
        }
        Ok(())
    }

    pub fn release_player_name(&self, name: &str) {
        self.lock()
            .creating_players
            .remove(&name.to_ascii_lowercase());
    }

    pub fn load_player(&self, name: &str) -> Result<PlayerRec> {
        self.lock().players.load(name)
    }

    pub fn save_player(&self, rec: &PlayerRec) -> Result<()> {
        self.lock().players.save(rec)
    }

    // ---- the world --------------------------------------------------------

    /// Which connection currently drives this character, if any. Queried,
    /// never cached: stale answers would break the takeover protocol.
    pub fn driver_of(&self, character: &str) -> Option<ConnId> {
        self.lock()
            .char_conns
            .get(&character.to_ascii_lowercase())
            .copied()
    }

    /// Put a character into the world driven by `conn`. One atomic
    /// check-then-set: if another connection attached the same character
    /// between the caller's menu check and this call, its id comes back and
    /// the caller must kick it.
    pub fn enter_world(&self, rec: PlayerRec, conn: ConnId) -> Option<ConnId> {
        let key = rec.name.to_ascii_lowercase();
        let mut g = self.lock();
        let old = g.char_conns.insert(key.clone(), conn);
        g.live_chars.insert(key, rec);
        old.filter(|id| *id != conn)
    }

    /// Transfer an in-world character to a new driving connection. Returns
    /// the previous driver (which the caller must kick) if there was one.
    pub fn take_over(&self, character: &str, new_conn: ConnId) -> Option<ConnId> {
        let key = character.to_ascii_lowercase();
        let mut g = self.lock();
        if !g.live_chars.contains_key(&key) {
            return None;
        }
        let old = g.char_conns.insert(key, new_conn);
        old.filter(|id| *id != new_conn)
    }

    /// Remove a character from the world. Non-guests are persisted on the
    /// way out; guests are discarded without a save.
    pub fn extract(&self, character: &str) -> Result<()> {
        let key = character.to_ascii_lowercase();
        let rec = {
            let mut g = self.lock();
            g.char_conns.remove(&key);
            g.live_chars.remove(&key)
        };
        match rec {
            Some(rec) if !rec.guest => {
                let g = self.lock();
                g.players.save(&rec)
            }
            _ => Ok(()),
        }
    }

    pub fn live_player(&self, character: &str) -> Option<PlayerRec> {
        self.lock()
            .live_chars
            .get(&character.to_ascii_lowercase())
            .cloned()
    }

    pub fn who_is_playing(&self) -> Vec<String> {
        let g = self.lock();
        let mut names = g.live_chars.values().map(|r| r.name.clone()).collect::<Vec<_>>();
        names.sort_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
        names
    }

    // ---- lockdown ---------------------------------------------------------

    pub fn lockdown(&self) -> String {
        self.lock().lockdown.clone()
    }

    pub fn set_lockdown(&self, spec: impl Into<String>) {
        self.lock().lockdown = spec.into();
    }

    /// Admission predicate: `None` means entry is allowed; otherwise the
    /// current restriction string. The lockdown setting is a comma-separated
    /// list of admitted groups.
    pub fn lockdown_blocks(&self, groups: &[String]) -> Option<String> {
        let spec = self.lockdown();
        if spec.trim().is_empty() {
            return None;
        }
        let admitted = spec
            .split(',')
            .map(str::trim)
            .any(|g| groups.iter().any(|mine| mine.eq_ignore_ascii_case(g)));
        if admitted {
            None
        } else {
            Some(spec)
        }
    }

    // ---- live connections -------------------------------------------------

    pub fn register_conn(&self, id: ConnId, handle: ConnHandle) {
        self.lock().conns.insert(id, handle);
    }

    pub fn unregister_conn(&self, id: ConnId) {
        self.lock().conns.remove(&id);
    }

    pub fn set_conn_host(&self, id: ConnId, host: String) {
        if let Some(h) = self.lock().conns.get_mut(&id) {
            h.host = host;
        }
    }

    /// Ask the transport task that owns `id` to shut the connection down.
    pub fn kill_conn(&self, id: ConnId) {
        let handle = { self.lock().conns.get(&id).cloned() };
        if let Some(h) = handle {
            let _ = h.kill_tx.send(true);
        }
    }

    /// Best-effort direct write to another connection's transport.
    pub fn send_to(&self, id: ConnId, bytes: Bytes) {
        let handle = { self.lock().conns.get(&id).cloned() };
        if let Some(h) = handle {
            let _ = h.write_tx.try_send(bytes);
        }
    }

    pub fn conn_count(&self) -> usize {
        self.lock().conns.len()
    }

    /// Snapshot of every live connection with its attachments, for the
    /// copyover state file.
    pub fn snapshot_conns(&self) -> Vec<ConnSnapshot> {
        let g = self.lock();
        g.conns
            .iter()
            .map(|(id, h)| ConnSnapshot {
                id: *id,
                fd: h.fd,
                peer: h.peer,
                host: h.host.clone(),
                // Resolve through the store so the entry carries the
                // creation-time capitalization, not the lowercased map key.
                account: g
                    .account_conns
                    .iter()
                    .find(|(_, c)| *c == id)
                    .and_then(|(n, _)| g.accounts.get(n))
                    .map(|r| r.name.clone()),
                character: g
                    .char_conns
                    .iter()
                    .find(|(_, c)| *c == id)
                    .and_then(|(n, _)| g.live_chars.get(n))
                    .filter(|rec| !rec.guest)
                    .map(|rec| rec.name.clone()),
            })
            .collect()
    }

    // ---- events & dispatcher ----------------------------------------------

    pub fn subscribe(&self, listener: Listener) {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).push(listener);
    }

    pub fn fire(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for l in listeners.iter() {
            l(&event);
        }
    }

    pub fn set_dispatcher(&self, d: Arc<dyn Dispatch>) {
        *self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = d;
    }

    pub fn dispatcher(&self) -> Arc<dyn Dispatch> {
        self.dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ---- teardown ---------------------------------------------------------

    /// Run every pending detach, reservation release, and persistence side
    /// effect for a connection that is going away, whatever state it was in.
    pub fn disconnect(&self, conn: &mut Conn) {
        if let Some(reserved) = conn.take_reserved_player() {
            self.release_player_name(&reserved);
        }
        if let Some(ch) = conn.take_character() {
            // After a takeover the character belongs to someone else; only
            // the current driver extracts.
            if self.driver_of(&ch) == Some(conn.id()) {
                if let Err(e) = self.extract(&ch) {
                    warn!(character = %ch, err = %e, "extract on disconnect failed");
                }
            }
        }
        if let Some(acct) = conn.take_account() {
            if let Err(e) = self.save_account(&acct) {
                warn!(account = %acct, err = %e, "account save on disconnect failed");
            }
            self.detach_account(&acct, conn.id());
        }
        self.unregister_conn(conn.id());
        info!(conn = conn.id(), peer = %conn.peer(), "connection closed");
    }
}
