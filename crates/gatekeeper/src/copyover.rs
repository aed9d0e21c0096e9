//! State carried across a hot in-place restart.
//!
//! A copyover re-execs the server binary while keeping client sockets open.
//! Everything in-process is lost; this module defines the little that is
//! written to disk before the exec (fd numbers and attachments per
//! connection) and rebuilds each connection's frames afterwards. No
//! partial-authentication state survives: a connection that was mid-login
//! starts the whole sequence over.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AccountMenu;
use crate::conn::{Conn, ConnId};
use crate::playing::enter_game;
use crate::registry::Registry;
use crate::stack::bust_prompt;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyoverState {
    pub listener_fd: i32,
    pub conns: Vec<ConnEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnEntry {
    pub fd: i32,
    pub id: ConnId,
    pub peer: IpAddr,
    pub host: String,
    pub account: Option<String>,
    pub character: Option<String>,
}

/// Collect the hand-off state for every connection whose fd can survive the
/// exec. Guests carry no character entry; they re-authenticate like anyone
/// else.
pub fn snapshot(reg: &Registry, listener_fd: i32) -> CopyoverState {
    let conns = reg
        .snapshot_conns()
        .into_iter()
        .filter_map(|s| {
            let fd = s.fd?;
            Some(ConnEntry {
                fd,
                id: s.id,
                peer: s.peer,
                host: s.host,
                account: s.account,
                character: s.character,
            })
        })
        .collect();
    CopyoverState { listener_fd, conns }
}

pub fn save_state(path: &Path, state: &CopyoverState) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and delete the hand-off file, so a crash after recovery cannot
/// replay stale fds on the next boot.
pub fn take_state(path: &Path) -> Result<CopyoverState> {
    let s = std::fs::read_to_string(path)?;
    let state = serde_json::from_str(&s)?;
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), err = %e, "could not remove copyover state file");
    }
    Ok(state)
}

/// Rebuild the frames for one surviving connection. A driven character goes
/// straight back into the world on top of its account menu; everything else
/// restarts authentication from the beginning.
pub fn recover(conn: &mut Conn, reg: &Registry, entry: &ConnEntry) {
    conn.set_host(entry.host.clone());
    reg.set_conn_host(conn.id(), entry.host.clone());
    conn.send("Copyover complete.");

    let account = entry
        .account
        .as_deref()
        .filter(|a| reg.account_exists(a))
        .map(str::to_string);

    let Some(acct) = account else {
        crate::greet(conn, reg);
        return;
    };
    let _ = reg.attach_account(&acct, conn.id());
    conn.set_account(acct.clone());

    if let Some(ch) = entry.character.as_deref() {
        match reg.load_player(ch) {
            Ok(rec) => {
                info!(conn = conn.id(), character = %rec.name, "copyover re-entry");
                conn.push(Box::new(AccountMenu::new(acct)));
                let frame = enter_game(conn, reg, rec, false);
                conn.push(frame);
                bust_prompt(conn, reg);
                return;
            }
            Err(e) => {
                warn!(character = %ch, err = %e, "copyover character load failed");
                conn.send(&format!("{ch} could not be restored."));
            }
        }
    }
    conn.push(Box::new(AccountMenu::new(acct)));
    bust_prompt(conn, reg);
}
