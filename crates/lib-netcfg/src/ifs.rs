use std::fs;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use tracing::debug;

use crate::{Ipv4Net, NetcfgError};

const SIOCGIWNAME: libc::c_ulong = 0x8b01;

#[repr(C)]
union IfReqData {
    addr: libc::sockaddr_in,
    flags: libc::c_short,
    index: libc::c_int,
}

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    data: IfReqData,
}

impl IfReq {
    fn new(name: &str) -> Self {
        let mut req = IfReq {
            name: [0; libc::IFNAMSIZ],
            data: IfReqData { index: 0 },
        };
        for (dst, src) in req.name.iter_mut().zip(name.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        req
    }
}

fn scratch_socket() -> Result<OwnedFd, NetcfgError> {
    socket(AddressFamily::Inet, SockType::Datagram, SockFlag::SOCK_CLOEXEC, None)
        .map_err(|e| NetcfgError::Syscall { call: "socket(AF_INET)", source: e.into() })
}

fn ioctl(fd: &OwnedFd, request: libc::c_ulong, req: &mut IfReq, call: &'static str) -> Result<(), NetcfgError> {
    let r = unsafe { libc::ioctl(fd.as_raw_fd(), request, req as *mut IfReq) };
    if r < 0 {
        return Err(NetcfgError::syscall(call));
    }
    Ok(())
}

fn sockaddr_from_ip(ip: Ipv4Addr) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr { s_addr: u32::from(ip).to_be() },
        sin_zero: [0; 8],
    }
}

/// A network interface, identified by kernel name and index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

/// Enumerate all interfaces via `if_nameindex`.
pub fn interfaces() -> Result<Vec<Interface>, NetcfgError> {
    let head = unsafe { libc::if_nameindex() };
    if head.is_null() {
        return Err(NetcfgError::syscall("if_nameindex"));
    }
    let mut out = Vec::new();
    let mut cursor = head;
    unsafe {
        while (*cursor).if_index != 0 {
            let name = std::ffi::CStr::from_ptr((*cursor).if_name)
                .to_string_lossy()
                .into_owned();
            out.push(Interface {
                name,
                index: (*cursor).if_index,
            });
            cursor = cursor.add(1);
        }
        libc::if_freenameindex(head);
    }
    Ok(out)
}

impl Interface {
    pub fn by_name(name: &str) -> Result<Self, NetcfgError> {
        interfaces()?
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| NetcfgError::NoSuchInterface(name.to_string()))
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self.flags(), Ok(flags) if flags & libc::IFF_LOOPBACK as libc::c_short != 0)
    }

    /// Wireless extensions answer SIOCGIWNAME; wired interfaces do not.
    pub fn is_wireless(&self) -> bool {
        let Ok(fd) = scratch_socket() else {
            return false;
        };
        let mut req = IfReq::new(&self.name);
        ioctl(&fd, SIOCGIWNAME, &mut req, "ioctl(SIOCGIWNAME)").is_ok()
    }

    fn flags(&self) -> Result<libc::c_short, NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        ioctl(&fd, libc::SIOCGIFFLAGS, &mut req, "ioctl(SIOCGIFFLAGS)")?;
        Ok(unsafe { req.data.flags })
    }

    pub fn ip(&self) -> Result<Ipv4Addr, NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        ioctl(&fd, libc::SIOCGIFADDR, &mut req, "ioctl(SIOCGIFADDR)")
            .map_err(|_| NetcfgError::NoAddress(self.name.clone()))?;
        let addr = unsafe { req.data.addr };
        Ok(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
    }

    pub fn netmask(&self) -> Result<Ipv4Addr, NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        ioctl(&fd, libc::SIOCGIFNETMASK, &mut req, "ioctl(SIOCGIFNETMASK)")
            .map_err(|_| NetcfgError::NoAddress(self.name.clone()))?;
        let addr = unsafe { req.data.addr };
        Ok(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)))
    }

    pub fn network(&self) -> Result<Ipv4Net, NetcfgError> {
        Ok(Ipv4Net::new(self.ip()?, self.netmask()?))
    }

    pub fn bring_up(&self) -> Result<(), NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        ioctl(&fd, libc::SIOCGIFFLAGS, &mut req, "ioctl(SIOCGIFFLAGS)")?;
        unsafe {
            req.data.flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        }
        ioctl(&fd, libc::SIOCSIFFLAGS, &mut req, "ioctl(SIOCSIFFLAGS)")
    }

    /// Assign an address and netmask, bring the link up and enable IPv4
    /// forwarding for this interface.
    pub fn configure(&self, ip: Ipv4Addr, network: Ipv4Net) -> Result<(), NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        req.data = IfReqData { addr: sockaddr_from_ip(ip) };
        ioctl(&fd, libc::SIOCSIFADDR, &mut req, "ioctl(SIOCSIFADDR)")?;

        let mut req = IfReq::new(&self.name);
        req.data = IfReqData { addr: sockaddr_from_ip(network.mask) };
        ioctl(&fd, libc::SIOCSIFNETMASK, &mut req, "ioctl(SIOCSIFNETMASK)")?;

        self.bring_up()?;

        let path = format!("/proc/sys/net/ipv4/conf/{}/forwarding", self.name);
        fs::write(&path, "1")?;
        debug!(interface = %self.name, %ip, %network, "configured LAN interface");
        Ok(())
    }

    /// Remove the IPv4 address assigned by [`Interface::configure`].
    pub fn deconfigure(&self) -> Result<(), NetcfgError> {
        let fd = scratch_socket()?;
        let mut req = IfReq::new(&self.name);
        req.data = IfReqData { addr: sockaddr_from_ip(Ipv4Addr::UNSPECIFIED) };
        ioctl(&fd, libc::SIOCSIFADDR, &mut req, "ioctl(SIOCSIFADDR)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_loopback() {
        let all = interfaces().unwrap();
        assert!(all.iter().any(|iface| iface.name == "lo"));
        let lo = Interface::by_name("lo").unwrap();
        assert!(lo.index > 0);
        assert!(lo.is_loopback());
        assert!(!lo.is_wireless());
    }

    #[test]
    fn unknown_interface_is_an_error() {
        assert!(matches!(
            Interface::by_name("does-not-exist0"),
            Err(NetcfgError::NoSuchInterface(_))
        ));
    }
}
