//! Choosing the WAN and LAN interfaces and an unused private subnet.

use std::net::Ipv4Addr;

use anyhow::{anyhow, bail, Context, Result};
use netcfg::{interfaces, Interface, Ipv4Net};
use netlink::consts::NETLINK_ROUTE;
use netlink::NetlinkSocket;
use tracing::{info, warn};

/// The WAN is the forced name when given, otherwise whichever interface
/// carries the default route.
pub fn pick_wan(forced: Option<String>) -> Result<Interface> {
    if let Some(name) = forced {
        return Interface::by_name(&name).map_err(Into::into);
    }

    let mut sock = NetlinkSocket::connect(NETLINK_ROUTE)
        .context("couldn't establish netlink to NETLINK_ROUTE")?;
    let mut default_oif = None;
    netlink::routes(&mut sock, |route| {
        if route.is_default() {
            default_oif = route.oif;
        }
    })
    .context("couldn't read the routing table")?;

    let oif = default_oif.ok_or_else(|| anyhow!("no default route; is the uplink up?"))?;
    interfaces()?
        .into_iter()
        .find(|iface| iface.index == oif)
        .ok_or_else(|| anyhow!("default route points at unknown interface {oif}"))
}

/// The LAN is the forced name when given, otherwise the first wired,
/// non-loopback interface without an address.
pub fn pick_lan(forced: Option<String>) -> Result<Interface> {
    if let Some(name) = forced {
        return Interface::by_name(&name).map_err(Into::into);
    }

    let candidates: Vec<Interface> = interfaces()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter(|iface| !iface.is_wireless())
        .filter(|iface| iface.ip().is_err())
        .collect();

    match candidates.as_slice() {
        [] => bail!("couldn't find any candidate LAN interface"),
        [only] => Ok(only.clone()),
        [first, ..] => {
            let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
            warn!(candidates = ?names, "multiple candidate LAN interfaces, picking the first");
            Ok(first.clone())
        }
    }
}

/// A /16 from the private ranges that no local interface already routes.
pub fn pick_unused_subnet() -> Result<Ipv4Net> {
    let mut available: Vec<Ipv4Addr> = Vec::new();
    for i in 0..=255 {
        available.push(Ipv4Addr::new(10, i, 0, 0));
    }
    for i in 16..32 {
        available.push(Ipv4Addr::new(172, i, 0, 0));
    }
    available.push(Ipv4Addr::new(192, 168, 0, 0));

    let mask = Ipv4Addr::new(255, 255, 0, 0);
    for iface in interfaces()? {
        let Ok(network) = iface.network() else {
            continue;
        };
        let union_mask = u32::from(network.mask) & u32::from(mask);
        available.retain(|candidate| {
            u32::from(network.addr) & union_mask != u32::from(*candidate) & union_mask
        });
    }

    let addr = *available
        .first()
        .ok_or_else(|| anyhow!("all private IP ranges are taken"))?;
    Ok(Ipv4Net::new(addr, mask))
}

/// Use the interface's existing IPv4 configuration when it has one;
/// otherwise configure it with a fresh subnet. Returns the LAN IP, the
/// network and whether this process did the configuring (and must undo it
/// on exit).
pub fn configure_lan(lan: &Interface) -> Result<(Ipv4Addr, Ipv4Net, bool)> {
    if let (Ok(ip), Ok(network)) = (lan.ip(), lan.network()) {
        info!(interface = %lan.name, %ip, %network, "using preconfigured LAN");
        return Ok((ip, network, false));
    }

    let network = pick_unused_subnet()?;
    let lan_ip = Ipv4Addr::from(u32::from(network.addr) + 1);
    info!(interface = %lan.name, ip = %lan_ip, %network, "configuring LAN");
    lan.configure(lan_ip, network)
        .with_context(|| format!("couldn't configure {}", lan.name))?;
    Ok((lan_ip, network, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_subnet_is_private() {
        let net = pick_unused_subnet().unwrap();
        let octets = net.addr.octets();
        assert!(
            octets[0] == 10
                || (octets[0] == 172 && (16..32).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        );
        assert_eq!(net.mask, Ipv4Addr::new(255, 255, 0, 0));
    }
}
