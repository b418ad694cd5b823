//! The sd_notify protocol, spoken directly over the notify socket.

use std::os::fd::AsRawFd;
use std::time::Duration;

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use tracing::debug;

/// Whether a supervisor is waiting for readiness notifications.
pub fn running_under_systemd() -> bool {
    std::env::var_os("NOTIFY_SOCKET").is_some()
}

fn notify(state: &str) {
    let Some(path) = std::env::var_os("NOTIFY_SOCKET") else {
        return;
    };
    let Ok(sock) = socket(
        AddressFamily::Unix,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    ) else {
        return;
    };

    // Abstract socket names start with '@' in the environment and with a
    // NUL byte on the wire.
    let path = path.to_string_lossy().into_owned();
    let mut name: Vec<u8> = path.into_bytes();
    if name.first() == Some(&b'@') {
        name[0] = 0;
    }
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if name.len() > addr.sun_path.len() {
        return;
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(&name) {
        *dst = *src as libc::c_char;
    }
    let addr_len = std::mem::size_of::<libc::sa_family_t>() + name.len();

    let r = unsafe {
        libc::sendto(
            sock.as_raw_fd(),
            state.as_ptr() as *const libc::c_void,
            state.len(),
            0,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            addr_len as libc::socklen_t,
        )
    };
    if r < 0 {
        debug!(err = %std::io::Error::last_os_error(), "sd_notify failed");
    }
}

pub fn notify_ready() {
    notify("READY=1");
}

pub fn notify_stopping() {
    notify("STOPPING=1");
}

pub fn notify_watchdog() {
    notify("WATCHDOG=1");
}

/// Half the supervisor's watchdog timeout, when one is armed.
pub fn watchdog_interval() -> Option<Duration> {
    let usec: u64 = std::env::var("WATCHDOG_USEC").ok()?.parse().ok()?;
    Some(Duration::from_micros(usec / 2))
}
