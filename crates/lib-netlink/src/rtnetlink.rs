use std::net::Ipv4Addr;

use crate::consts::*;
use crate::{MsgBuilder, NetlinkError, NetlinkSocket};

/// One IPv4 route from the main routing table.
#[derive(Debug, Clone)]
pub struct Route {
    pub dst: Ipv4Addr,
    pub dst_mask: Ipv4Addr,
    pub oif: Option<u32>,
    pub prefsrc: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub priority: Option<u32>,
}

impl Default for Route {
    fn default() -> Self {
        Route {
            dst: Ipv4Addr::UNSPECIFIED,
            dst_mask: Ipv4Addr::UNSPECIFIED,
            oif: None,
            prefsrc: None,
            gateway: None,
            priority: None,
        }
    }
}

impl Route {
    /// The default route has a zero destination and mask and a gateway.
    pub fn is_default(&self) -> bool {
        self.dst == Ipv4Addr::UNSPECIFIED
            && self.dst_mask == Ipv4Addr::UNSPECIFIED
            && self.gateway.is_some()
    }
}

fn prefix_mask(prefix_len: u8) -> Ipv4Addr {
    if prefix_len == 0 {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from(u32::MAX << (32 - prefix_len as u32))
    }
}

fn attr_ip(payload: &[u8]) -> Option<Ipv4Addr> {
    payload
        .get(..4)
        .map(|b| Ipv4Addr::from(<[u8; 4]>::try_from(b).unwrap()))
}

/// Dump the main IPv4 routing table through `RTM_GETROUTE`.
pub fn routes<F>(sock: &mut NetlinkSocket, mut callback: F) -> Result<(), NetlinkError>
where
    F: FnMut(&Route),
{
    let mut msg = MsgBuilder::new();
    let seq = sock.next_seq();
    let m = msg.message(RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, seq);
    // struct rtmsg: family, dst_len, src_len, tos, table, protocol, scope,
    // type, flags.
    msg.push_bytes(&[libc::AF_INET as u8, 0, 0, 0, RT_TABLE_MAIN, 0, 0, 0]);
    msg.push_u32(0);
    msg.finish(m);
    sock.send(&msg)?;

    sock.receive(RTM_HDRLEN, RTA_MAX, |header, fixed, attrs| {
        if header.mtype != RTM_NEWROUTE {
            return Ok(());
        }
        let mut route = Route {
            dst_mask: prefix_mask(fixed[1]),
            ..Route::default()
        };
        if let Some(payload) = attrs.get(RTA_DST) {
            if let Some(ip) = attr_ip(payload) {
                route.dst = ip;
            }
        }
        if let Some(oif) = attrs.get_u32(RTA_OIF) {
            route.oif = Some(oif);
        }
        if let Some(payload) = attrs.get(RTA_PREFSRC) {
            route.prefsrc = attr_ip(payload);
        }
        if let Some(payload) = attrs.get(RTA_GATEWAY) {
            route.gateway = attr_ip(payload);
        }
        if let Some(priority) = attrs.get_u32(RTA_PRIORITY) {
            route.priority = Some(priority);
        }
        callback(&route);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_masks() {
        assert_eq!(prefix_mask(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(prefix_mask(16), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(prefix_mask(32), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn route_dump_parses() {
        let mut sock = NetlinkSocket::connect(NETLINK_ROUTE).unwrap();
        let mut seen = Vec::new();
        routes(&mut sock, |route| seen.push(route.clone())).unwrap();
        for route in &seen {
            // Destination must be consistent with its mask.
            let dst = u32::from(route.dst);
            let mask = u32::from(route.dst_mask);
            assert_eq!(dst & mask, dst);
        }
    }
}
