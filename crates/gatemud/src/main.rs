use std::sync::Arc;

use gatekeeper::Registry;
use tracing::{info, warn, Level};

mod config;
mod copyover;
mod dispatch;
mod resolver;
mod session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gatemud=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = Arc::new(config::parse_args());
    let reg = Arc::new(Registry::open(
        cfg.accounts_path.clone(),
        cfg.players_dir.clone(),
    ));
    reg.set_lockdown(cfg.lockdown.clone());

    let (copyover_tx, mut copyover_rx) = tokio::sync::mpsc::channel::<()>(1);
    reg.set_dispatcher(Arc::new(dispatch::GameDispatch::new(copyover_tx)));
    reg.subscribe(Box::new(|ev| info!(event = ?ev, "world event")));

    let listener = if cfg.copyover_recover {
        let state = gatekeeper::copyover::take_state(&cfg.copyover_path)?;
        let listener = copyover::restore_listener(state.listener_fd)?;
        info!(conns = state.conns.len(), "copyover recovery");
        for entry in state.conns {
            let stream = match copyover::restore_stream(entry.fd) {
                Ok(s) => s,
                Err(e) => {
                    warn!(conn = entry.id, fd = entry.fd, err = %e, "fd did not survive copyover");
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .unwrap_or_else(|_| std::net::SocketAddr::new(entry.peer, 0));
            let reg = reg.clone();
            tokio::spawn(async move {
                if let Err(e) = session::handle_conn(stream, peer, reg, Some(entry)).await {
                    warn!(peer = %peer, err = %e, "connection ended with error");
                }
            });
        }
        listener
    } else {
        tokio::net::TcpListener::bind(cfg.bind).await?
    };

    let lockdown_desc = if cfg.lockdown.is_empty() {
        "(open)"
    } else {
        cfg.lockdown.as_str()
    };
    info!(
        bind = %cfg.bind,
        accounts = %cfg.accounts_path.display(),
        players = %cfg.players_dir.display(),
        lockdown = %lockdown_desc,
        "lifecycle gate listening"
    );

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, peer) = res?;
                let reg = reg.clone();
                tokio::spawn(async move {
                    if let Err(e) = session::handle_conn(stream, peer, reg, None).await {
                        warn!(peer = %peer, err = %e, "connection ended with error");
                    }
                });
            }
            Some(()) = copyover_rx.recv() => {
                warn!("copyover requested");
                if let Err(e) = copyover::perform(&reg, &listener, &cfg.copyover_path) {
                    warn!(err = %e, "copyover failed; continuing without restart");
                }
            }
        }
    }
}
