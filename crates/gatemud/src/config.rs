use std::net::SocketAddr;
use std::path::PathBuf;

fn usage_and_exit() -> ! {
    eprintln!(
        "gatemud (connection lifecycle gate)\n\n\
USAGE:\n  gatemud [--bind HOST:PORT] [--lockdown GROUPS] [--copyover]\n\n\
ENV:\n  GATEMUD_BIND            default 0.0.0.0:4000\n  GATEMUD_ACCOUNTS_PATH   optional; default accounts.json (in WorkingDirectory)\n  GATEMUD_PLAYERS_DIR     optional; default players\n  GATEMUD_COPYOVER_PATH   optional; default copyover.json\n  GATEMUD_LOCKDOWN        optional; comma-separated admitted groups, empty = open\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    // Accounts DB (stores only password hashes, never raw passwords).
    pub accounts_path: PathBuf,
    pub players_dir: PathBuf,
    pub copyover_path: PathBuf,
    pub lockdown: String,
    // Set by the --copyover flag the server passes itself across an exec.
    pub copyover_recover: bool,
}

pub fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("GATEMUD_BIND")
        .unwrap_or_else(|_| "0.0.0.0:4000".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let accounts_path: PathBuf = std::env::var("GATEMUD_ACCOUNTS_PATH")
        .unwrap_or_else(|_| "accounts.json".to_string())
        .into();
    let players_dir: PathBuf = std::env::var("GATEMUD_PLAYERS_DIR")
        .unwrap_or_else(|_| "players".to_string())
        .into();
    let copyover_path: PathBuf = std::env::var("GATEMUD_COPYOVER_PATH")
        .unwrap_or_else(|_| "copyover.json".to_string())
        .into();
    let mut lockdown = std::env::var("GATEMUD_LOCKDOWN").unwrap_or_default();

    let mut copyover_recover = false;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--lockdown" => {
                lockdown = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "--copyover" => copyover_recover = true,
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        accounts_path,
        players_dir,
        copyover_path,
        lockdown,
        copyover_recover,
    }
}
