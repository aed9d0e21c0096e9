//! Reverse DNS for peer addresses.
//!
//! `getnameinfo` blocks, so the lookup runs on the blocking pool with a hard
//! deadline; the session keeps handling everything else in the meantime. On
//! failure or timeout the textual IP stands in for the hostname.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn reverse_lookup(ip: IpAddr) -> String {
    let lookup = tokio::task::spawn_blocking(move || lookup_name(ip));
    match tokio::time::timeout(RESOLVE_TIMEOUT, lookup).await {
        Ok(Ok(Some(host))) => host,
        _ => ip.to_string(),
    }
}

const HOST_BUF: usize = 1025; // NI_MAXHOST

fn lookup_name(ip: IpAddr) -> Option<String> {
    let addr = SocketAddr::new(ip, 0);
    let mut host = [0 as libc::c_char; HOST_BUF];

    unsafe {
        let mut ss: libc::sockaddr_storage = std::mem::zeroed();
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = &mut *(&mut ss as *mut _ as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = 0;
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
            }
            SocketAddr::V6(v6) => {
                let sin6 = &mut *(&mut ss as *mut _ as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = 0;
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
            }
        };

        let rc = libc::getnameinfo(
            &ss as *const _ as *const libc::sockaddr,
            len,
            host.as_mut_ptr(),
            HOST_BUF as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        );
        if rc != 0 {
            return None;
        }
        std::ffi::CStr::from_ptr(host.as_ptr())
            .to_str()
            .ok()
            .map(str::to_string)
    }
}
