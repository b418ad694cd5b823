use std::net::Ipv4Addr;
use std::os::fd::RawFd;

use crate::{MacAddr, NetcfgError};

const SIOCSARP: libc::c_ulong = 0x8955;
const ATF_COM: libc::c_int = 0x02;

#[repr(C)]
struct ArpReq {
    arp_pa: libc::sockaddr_in,
    arp_ha: libc::sockaddr,
    arp_flags: libc::c_int,
    arp_netmask: libc::sockaddr,
    arp_dev: [libc::c_char; 16],
}

/// Install a completed ARP entry for `(ip, mac)` on `interface`.
///
/// The DHCP server needs this before replying to clients that don't have an
/// address yet - the unicast reply could not traverse the link layer
/// otherwise. `fd` is any AF_INET socket.
pub fn set_arp_entry(
    fd: RawFd,
    interface: &str,
    ip: Ipv4Addr,
    mac: MacAddr,
) -> Result<(), NetcfgError> {
    let mut ha = libc::sockaddr {
        sa_family: libc::AF_UNSPEC as libc::sa_family_t,
        sa_data: [0; 14],
    };
    for (dst, src) in ha.sa_data.iter_mut().zip(mac.bytes()) {
        *dst = *src as libc::c_char;
    }
    let mut req = ArpReq {
        arp_pa: libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr { s_addr: u32::from(ip).to_be() },
            sin_zero: [0; 8],
        },
        arp_ha: ha,
        arp_flags: ATF_COM,
        arp_netmask: unsafe { std::mem::zeroed() },
        arp_dev: [0; 16],
    };
    for (dst, src) in req.arp_dev.iter_mut().zip(interface.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    let r = unsafe { libc::ioctl(fd, SIOCSARP, &mut req as *mut ArpReq) };
    if r < 0 {
        return Err(NetcfgError::syscall("ioctl(SIOCSARP)"));
    }
    Ok(())
}
