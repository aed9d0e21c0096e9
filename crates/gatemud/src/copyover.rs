//! Copyover exec mechanics: keep every socket alive across an in-place
//! re-exec of the server binary.
//!
//! The sequence is: snapshot connections, write the hand-off file, strip
//! FD_CLOEXEC from the listener and every client fd, then `exec` ourselves
//! with `--copyover`. The new process reads the hand-off file, re-wraps the
//! fds, and rebuilds each connection's frames.

use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use gatekeeper::copyover::{save_state, snapshot};
use gatekeeper::Registry;
use tracing::info;

pub const COPYOVER_FLAG: &str = "--copyover";

fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Linux reports `/proc/self/exe` with a " (deleted)" suffix once the binary
/// has been replaced on disk; strip it so the exec picks up the new build.
fn server_binary() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let s = exe.to_string_lossy();
    match s.strip_suffix(" (deleted)") {
        Some(stripped) => Ok(PathBuf::from(stripped)),
        None => Ok(exe),
    }
}

/// Snapshot, persist, and exec. Returns only on failure; on success the
/// process image is replaced and nothing after the call runs.
pub fn perform(
    reg: &Registry,
    listener: &tokio::net::TcpListener,
    path: &Path,
) -> anyhow::Result<()> {
    let listener_fd = listener.as_raw_fd();
    let state = snapshot(reg, listener_fd);

    for c in &state.conns {
        reg.send_to(c.id, Bytes::from_static(b"Copyover in progress, hold on...\r\n"));
    }

    save_state(path, &state).context("write copyover state")?;
    clear_cloexec(listener_fd).context("clear cloexec on listener")?;
    for c in &state.conns {
        clear_cloexec(c.fd).with_context(|| format!("clear cloexec on fd {}", c.fd))?;
    }

    let exe = server_binary()?;
    info!(exe = %exe.display(), conns = state.conns.len(), "copyover exec");
    let err = std::process::Command::new(exe).arg(COPYOVER_FLAG).exec();
    Err(anyhow::anyhow!("copyover exec failed: {err}"))
}

pub fn restore_listener(fd: RawFd) -> anyhow::Result<tokio::net::TcpListener> {
    let std_l = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    std_l.set_nonblocking(true)?;
    Ok(tokio::net::TcpListener::from_std(std_l)?)
}

pub fn restore_stream(fd: RawFd) -> anyhow::Result<tokio::net::TcpStream> {
    let std_s = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    std_s.set_nonblocking(true)?;
    Ok(tokio::net::TcpStream::from_std(std_s)?)
}
