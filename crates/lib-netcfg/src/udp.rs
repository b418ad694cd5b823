use std::net::UdpSocket;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType};

use crate::NetcfgError;

/// Bind a non-blocking UDP socket the way the daemon's listeners need it:
/// `SO_REUSEADDR`, optionally `SO_REUSEPORT`, optionally pinned to a device
/// with `SO_BINDTODEVICE`.
pub fn bind_udp(
    port: u16,
    device: Option<&str>,
    reuse_port: bool,
) -> Result<UdpSocket, NetcfgError> {
    let fd: OwnedFd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| NetcfgError::Syscall { call: "socket(AF_INET, SOCK_DGRAM)", source: e.into() })?;

    setsockopt(&fd, sockopt::ReuseAddr, &true)
        .map_err(|e| NetcfgError::Syscall { call: "setsockopt(SO_REUSEADDR)", source: e.into() })?;
    if reuse_port {
        setsockopt(&fd, sockopt::ReusePort, &true).map_err(|e| NetcfgError::Syscall {
            call: "setsockopt(SO_REUSEPORT)",
            source: e.into(),
        })?;
    }
    if let Some(device) = device {
        setsockopt(&fd, sockopt::BindToDevice, &device.into()).map_err(|e| {
            NetcfgError::Syscall {
                call: "setsockopt(SO_BINDTODEVICE)",
                source: e.into(),
            }
        })?;
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr { s_addr: libc::INADDR_ANY.to_be() },
        sin_zero: [0; 8],
    };
    let r = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if r < 0 {
        return Err(NetcfgError::syscall("bind"));
    }

    Ok(UdpSocket::from(fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port_nonblocking() {
        let sock = bind_udp(0, None, false).unwrap();
        let mut buf = [0u8; 16];
        // Non-blocking socket with nothing queued reports WouldBlock.
        let err = sock.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn reuse_port_allows_double_bind() {
        let first = bind_udp(0, None, true).unwrap();
        let port = first.local_addr().unwrap().port();
        let _second = bind_udp(port, None, true).unwrap();
    }
}
