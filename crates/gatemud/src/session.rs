//! One task per connection: read, decode, dispatch, flush.
//!
//! The task owns the `Conn`; everything another connection might touch goes
//! through the registry handle registered here (direct writes, the takeover
//! kill switch, the copyover fd).

use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use bytes::Bytes;
use gateio::line::LineSplitter;
use gateio::telnet::IacParser;
use gatekeeper::conn::new_conn_id;
use gatekeeper::copyover::ConnEntry;
use gatekeeper::registry::ConnHandle;
use gatekeeper::{auth, copyover, dispatch, Conn, Registry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::resolver;

pub async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    reg: Arc<Registry>,
    recovered: Option<ConnEntry>,
) -> anyhow::Result<()> {
    let fd = stream.as_raw_fd();
    let (mut rd, mut wr) = stream.into_split();

    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(128);
    let writer = tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&b[..]).await.is_err() {
                break;
            }
        }
    });
    let (kill_tx, mut kill_rx) = watch::channel(false);

    let id = recovered.as_ref().map(|e| e.id).unwrap_or_else(new_conn_id);
    let mut conn = Conn::with_id(id, peer.ip());
    reg.register_conn(
        id,
        ConnHandle {
            write_tx: write_tx.clone(),
            kill_tx,
            fd: Some(fd),
            peer: peer.ip(),
            host: recovered
                .as_ref()
                .map(|e| e.host.clone())
                .unwrap_or_else(|| peer.ip().to_string()),
        },
    );

    match &recovered {
        Some(entry) => {
            info!(conn = id, peer = %peer, "connection recovered from copyover");
            copyover::recover(&mut conn, &reg, entry);
        }
        None => {
            info!(conn = id, peer = %peer, "connection opened");
            gatekeeper::greet(&mut conn, &reg);
        }
    }

    // Only a fresh authentication sequence sits at the DNS wait.
    let (dns_tx, mut dns_rx) = mpsc::channel::<String>(1);
    if conn.label() == "dns-wait" {
        let ip = peer.ip();
        tokio::spawn(async move {
            let host = resolver::reverse_lookup(ip).await;
            let _ = dns_tx.send(host).await;
        });
    }
    flush(&mut conn, &write_tx).await;

    let mut iac = IacParser::new();
    let mut lines = LineSplitter::new();
    let mut buf = [0u8; 4096];

    'read: loop {
        tokio::select! {
            res = rd.read(&mut buf) => {
                // A failed read (reset, timeout) is just another way the
                // connection ends; the shared teardown below must still run.
                let n = match res {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(conn = id, err = %e, "read failed");
                        break 'read;
                    }
                };
                if n == 0 {
                    break 'read;
                }
                let (data, replies) = iac.parse(&buf[..n]);
                if !replies.is_empty() {
                    let _ = write_tx.send(Bytes::from(replies)).await;
                }
                lines.push(&data);
                loop {
                    match lines.pop() {
                        Ok(Some(line)) => {
                            let line = String::from_utf8_lossy(&line).into_owned();
                            dispatch(&mut conn, &reg, &line);
                            flush(&mut conn, &write_tx).await;
                            if conn.is_closed() {
                                break 'read;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(conn = id, err = %e, "dropping connection");
                            break 'read;
                        }
                    }
                }
            }
            Some(host) = dns_rx.recv() => {
                auth::dns_complete(&mut conn, &reg, host);
                flush(&mut conn, &write_tx).await;
            }
            _ = kill_rx.changed() => {
                break 'read;
            }
        }
    }

    reg.disconnect(&mut conn);
    flush(&mut conn, &write_tx).await;
    drop(write_tx);
    let _ = writer.await;
    Ok(())
}

async fn flush(conn: &mut Conn, write_tx: &mpsc::Sender<Bytes>) {
    if conn.has_output() {
        let _ = write_tx.send(conn.take_output()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_registry(tag: &str) -> Arc<Registry> {
        let dir = std::env::temp_dir().join(format!(
            "gatemud-session-{tag}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(Registry::open(dir.join("accounts.json"), dir.join("players")))
    }

    #[tokio::test]
    async fn aborted_transport_still_runs_disconnect_cleanup() {
        let reg = test_registry("abort");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        // Linger 0 turns the close into a reset, so the server's next read
        // fails instead of seeing a clean EOF.
        client.set_linger(Some(Duration::from_secs(0))).unwrap();
        drop(client);

        handle_conn(stream, peer, reg.clone(), None).await.unwrap();
        assert_eq!(reg.conn_count(), 0);
    }
}
