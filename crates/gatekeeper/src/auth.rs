//! Authentication frames: the DNS wait, the credential menu, the account
//! menu, and the password-change sub-dialog.

use bytes::Bytes;
use tracing::info;

use crate::chargen::{enter_as_guest, ChargenName};
use crate::conn::Conn;
use crate::player::DFLT_USER_GROUP;
use crate::playing::{enter_game, reconnect_game};
use crate::registry::Registry;
use crate::stack::{bust_prompt, Handler, StackOp};

/// Parked on top of the credential menu until reverse resolution of the
/// peer address finishes. Input arriving early is swallowed; only the
/// resolver's completion callback pops this frame.
pub struct DnsWait;

impl Handler for DnsWait {
    fn label(&self) -> &'static str {
        "dns-wait"
    }

    fn consume(&mut self, _conn: &mut Conn, _reg: &Registry, _line: &str) -> Vec<StackOp> {
        Vec::new()
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"Resolving your internet address, have patience...\r\n")
    }
}

/// Completion callback for the DNS wait: record the resolved host, pop the
/// wait frame, and let the prompt gate reveal the credential menu. A no-op
/// unless the wait frame is still on top (the connection may have closed or
/// been rebuilt by a restart in the meantime).
pub fn dns_complete(conn: &mut Conn, reg: &Registry, host: String) {
    if conn.is_closed() || conn.label() != "dns-wait" {
        return;
    }
    info!(conn = conn.id(), host = %host, "lookup complete");
    reg.set_conn_host(conn.id(), host.clone());
    conn.set_host(host);
    conn.pop();
    conn.send("Lookup complete.");
    bust_prompt(conn, reg);
}

/// The pre-authentication menu. One-shot commands, credentials inline.
pub struct CredMenu;

impl CredMenu {
    pub fn new() -> Self {
        CredMenu
    }
}

impl Default for CredMenu {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for CredMenu {
    fn label(&self) -> &'static str {
        "cred-menu"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or("").to_ascii_lowercase();
        match verb.as_str() {
            "load" => {
                let (Some(name), Some(pass)) = (words.next(), words.next()) else {
                    conn.send("Usage: load <account> <password>");
                    return Vec::new();
                };
                match reg.login_account(name, pass) {
                    Ok(rec) => {
                        let _ = reg.attach_account(&rec.name, conn.id());
                        conn.set_account(rec.name.clone());
                        info!(conn = conn.id(), account = %rec.name, "login");
                        vec![
                            StackOp::Pop,
                            StackOp::Push(Box::new(AccountMenu::new(rec.name))),
                        ]
                    }
                    Err(_) => {
                        conn.send("Invalid account name or password.");
                        Vec::new()
                    }
                }
            }
            "create" => {
                let (Some(name), Some(pass)) = (words.next(), words.next()) else {
                    conn.send("Usage: create <account> <password>");
                    return Vec::new();
                };
                let player = [DFLT_USER_GROUP.to_string()];
                if let Some(spec) = reg.lockdown_blocks(&player) {
                    conn.send(&format!("The game is currently restricted to: {spec}."));
                    return Vec::new();
                }
                match reg.create_account(name, pass) {
                    Ok(rec) => {
                        let _ = reg.attach_account(&rec.name, conn.id());
                        conn.set_account(rec.name.clone());
                        conn.send("Account created!");
                        vec![
                            StackOp::Pop,
                            StackOp::Push(Box::new(AccountMenu::new(rec.name))),
                        ]
                    }
                    Err(e) => {
                        conn.send(&format!("Could not create that account: {e}."));
                        Vec::new()
                    }
                }
            }
            "guest" => {
                let player = [DFLT_USER_GROUP.to_string()];
                if let Some(spec) = reg.lockdown_blocks(&player) {
                    conn.send(&format!("The game is currently restricted to: {spec}."));
                    return Vec::new();
                }
                let frame = enter_as_guest(conn, reg);
                vec![StackOp::Pop, StackOp::Push(frame)]
            }
            "" => Vec::new(),
            _ => {
                conn.send("Unknown command.");
                Vec::new()
            }
        }
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(
            b"Commands: load <account> <password>, create <account> <password>, guest\r\n> ",
        )
    }
}

/// Post-login hub: pick a character by number, make a new one, change the
/// password, or quit.
pub struct AccountMenu {
    account: String,
}

impl AccountMenu {
    pub fn new(account: String) -> Self {
        Self { account }
    }
}

impl Handler for AccountMenu {
    fn label(&self) -> &'static str {
        "account-menu"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        let choice = line.trim();
        if let Ok(n) = choice.parse::<usize>() {
            return self.select_character(conn, reg, n);
        }
        match choice.to_ascii_lowercase().as_str() {
            "n" => vec![StackOp::Push(Box::new(ChargenName))],
            "p" => vec![
                StackOp::Push(Box::new(PasswordConfirm {
                    account: self.account.clone(),
                })),
                StackOp::Push(Box::new(PasswordNew {
                    account: self.account.clone(),
                })),
                StackOp::Push(Box::new(PasswordVerify::new(self.account.clone()))),
            ],
            "q" => {
                if let Err(e) = reg.save_account(&self.account) {
                    tracing::warn!(account = %self.account, err = %e, "save on quit failed");
                }
                conn.send("Goodbye!");
                vec![StackOp::Close]
            }
            _ => {
                conn.send("Invalid choice!");
                Vec::new()
            }
        }
    }

    fn prompt(&self, _conn: &Conn, reg: &Registry) -> Bytes {
        let chars = reg.account_characters(&self.account);
        let mut text = String::from("\r\n  Account menu\r\n");
        if chars.is_empty() {
            text.push_str("  You have no characters yet.\r\n");
        }
        for (i, ch) in chars.iter().enumerate() {
            text.push_str(&format!("  {}) {ch}\r\n", i + 1));
        }
        text.push_str("  N) new character  P) change password  Q) quit\r\n> ");
        Bytes::from(text)
    }
}

impl AccountMenu {
    /// Digit selection: load the character, or take it over if some other
    /// connection is driving it right now.
    fn select_character(&self, conn: &mut Conn, reg: &Registry, n: usize) -> Vec<StackOp> {
        let chars = reg.account_characters(&self.account);
        if n == 0 || n > chars.len() {
            conn.send("Invalid choice!");
            return Vec::new();
        }
        let name = &chars[n - 1];

        if reg.driver_of(name).is_some() {
            if let Some(frame) = reconnect_game(conn, reg, name) {
                return vec![StackOp::Push(frame)];
            }
            // Extracted between the check and the takeover; load instead.
        }

        let rec = match reg.load_player(name) {
            Ok(rec) => rec,
            Err(e) => {
                conn.send(&format!("{name} could not be loaded: {e}."));
                return Vec::new();
            }
        };
        if let Some(spec) = reg.lockdown_blocks(&rec.groups) {
            conn.send(&format!("The game is currently restricted to: {spec}."));
            return Vec::new();
        }
        let frame = enter_game(conn, reg, rec, false);
        vec![StackOp::Push(frame)]
    }
}

const MAX_PASSWORD_ATTEMPTS: u8 = 3;

/// Gate on the current password before a change is allowed. Three wrong
/// answers close the connection.
pub struct PasswordVerify {
    account: String,
    attempts: u8,
}

impl PasswordVerify {
    pub fn new(account: String) -> Self {
        Self {
            account,
            attempts: 0,
        }
    }
}

impl Handler for PasswordVerify {
    fn label(&self) -> &'static str {
        "password-verify"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        if reg.password_matches(&self.account, line) {
            return vec![StackOp::Pop];
        }
        self.attempts += 1;
        if self.attempts >= MAX_PASSWORD_ATTEMPTS {
            conn.send("Bad password! Disconnecting.");
            return vec![StackOp::Close];
        }
        conn.send("Wrong password, try again.");
        Vec::new()
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"Current password: ")
    }

    fn squelch_input(&self) -> bool {
        true
    }
}

/// Ask for the replacement password. The credential is stored the moment a
/// non-empty answer arrives; the confirm frame below re-checks it.
pub struct PasswordNew {
    account: String,
}

impl Handler for PasswordNew {
    fn label(&self) -> &'static str {
        "password-new"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        if line.is_empty() {
            conn.send("Password cannot be empty.");
            return Vec::new();
        }
        if let Err(e) = reg.set_password(&self.account, line) {
            conn.send(&format!("Could not change your password: {e}."));
            return Vec::new();
        }
        vec![StackOp::Pop]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"New password: ")
    }

    fn squelch_input(&self) -> bool {
        true
    }
}

/// Re-type the new password. A mismatch re-runs the whole sub-dialog from
/// the verify step; this frame stays put beneath the re-pushed pair.
pub struct PasswordConfirm {
    account: String,
}

impl Handler for PasswordConfirm {
    fn label(&self) -> &'static str {
        "password-confirm"
    }

    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp> {
        if reg.password_matches(&self.account, line) {
            conn.send("Password changed.");
            return vec![StackOp::Pop];
        }
        conn.send("Passwords do not match.");
        vec![
            StackOp::Push(Box::new(PasswordNew {
                account: self.account.clone(),
            })),
            StackOp::Push(Box::new(PasswordVerify::new(self.account.clone()))),
        ]
    }

    fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
        Bytes::from_static(b"Verify new password: ")
    }

    fn squelch_input(&self) -> bool {
        true
    }
}
