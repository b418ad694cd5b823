use std::os::fd::RawFd;

use tracing::warn;

use crate::builder::MsgRef;
use crate::consts::*;
use crate::{AttrSet, MsgBuilder, NestedIter, NetlinkError, NetlinkSocket};

/// One operation advertised by a generic netlink family.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenlOp {
    pub op_id: u32,
    pub flags: u32,
}

impl GenlOp {
    pub fn can_do(&self) -> bool {
        self.flags & GENL_CMD_CAP_DO != 0
    }

    pub fn can_dump(&self) -> bool {
        self.flags & GENL_CMD_CAP_DUMP != 0
    }
}

#[derive(Debug, Clone)]
pub struct MulticastGroup {
    pub id: u32,
    pub name: String,
}

/// A connection to one generic netlink family.
///
/// Construction resolves the family name through `CTRL_CMD_GETFAMILY` and
/// records the numeric id, the command table and the multicast groups.
pub struct GenlFamily {
    pub sock: NetlinkSocket,
    pub name: String,
    pub family_id: u16,
    pub version: u32,
    pub header_size: u32,
    pub max_attrs: u16,
    pub ops: Vec<GenlOp>,
    pub multicast_groups: Vec<MulticastGroup>,
}

fn c_string(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn ne_u32(payload: &[u8]) -> Option<u32> {
    payload.get(..4).map(|b| u32::from_ne_bytes(b.try_into().unwrap()))
}

impl GenlFamily {
    pub fn resolve(name: &str) -> Result<Self, NetlinkError> {
        let mut sock = NetlinkSocket::connect(NETLINK_GENERIC)?;

        let mut msg = MsgBuilder::new();
        let seq = sock.next_seq();
        let m = msg.message(GENL_ID_CTRL, NLM_F_REQUEST, seq);
        msg.push_u8(CTRL_CMD_GETFAMILY);
        msg.push_u8(2); // genl version
        msg.push_u16(0);
        msg.attr_str(CTRL_ATTR_FAMILY_NAME, name);
        msg.finish(m);
        sock.send(&msg)?;

        let mut family_id = 0u16;
        let mut version = 0u32;
        let mut header_size = 0u32;
        let mut max_attrs = 0u16;
        let mut ops = Vec::new();
        let mut multicast_groups = Vec::new();

        sock.receive(GENL_HDRLEN, CTRL_ATTR_MAX, |header, _genl, attrs| {
            if header.mtype != GENL_ID_CTRL {
                return Err(NetlinkError::UnexpectedMessage { mtype: header.mtype });
            }
            if let Some(id) = attrs.get_u16(CTRL_ATTR_FAMILY_ID) {
                family_id = id;
            }
            if let Some(v) = attrs.get_u32(CTRL_ATTR_VERSION) {
                version = v;
            }
            if let Some(size) = attrs.get_u32(CTRL_ATTR_HDRSIZE) {
                header_size = size;
            }
            if let Some(max) = attrs.get_u32(CTRL_ATTR_MAXATTR) {
                max_attrs = max.min(u16::MAX as u32) as u16;
            }
            if let Some(raw) = attrs.get(CTRL_ATTR_OPS) {
                for (_, op_attrs) in NestedIter::new(raw) {
                    let mut op = GenlOp::default();
                    for (atype, payload) in NestedIter::new(op_attrs) {
                        match atype {
                            CTRL_ATTR_OP_ID => op.op_id = ne_u32(payload).unwrap_or(0),
                            CTRL_ATTR_OP_FLAGS => op.flags = ne_u32(payload).unwrap_or(0),
                            _ => {}
                        }
                    }
                    ops.push(op);
                }
            }
            if let Some(raw) = attrs.get(CTRL_ATTR_MCAST_GROUPS) {
                for (_, group_attrs) in NestedIter::new(raw) {
                    let mut group = MulticastGroup { id: 0, name: String::new() };
                    for (atype, payload) in NestedIter::new(group_attrs) {
                        match atype {
                            CTRL_ATTR_MCAST_GRP_ID => group.id = ne_u32(payload).unwrap_or(0),
                            CTRL_ATTR_MCAST_GRP_NAME => group.name = c_string(payload),
                            _ => {}
                        }
                    }
                    multicast_groups.push(group);
                }
            }
            Ok(())
        })?;

        if family_id == 0 {
            return Err(NetlinkError::NoSuchFamily(name.to_string()));
        }
        Ok(GenlFamily {
            sock,
            name: name.to_string(),
            family_id,
            version,
            header_size,
            max_attrs,
            ops,
            multicast_groups,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.sock.fd()
    }

    /// Join one of the family's multicast groups.
    pub fn add_membership(&self, group_name: &str) -> Result<(), NetlinkError> {
        let group = self
            .multicast_groups
            .iter()
            .find(|g| g.name == group_name)
            .ok_or_else(|| NetlinkError::NoSuchGroup(group_name.to_string()))?;
        let id = group.id as libc::c_int;
        let r = unsafe {
            libc::setsockopt(
                self.sock.fd(),
                SOL_NETLINK,
                NETLINK_ADD_MEMBERSHIP,
                &id as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if r < 0 {
            return Err(NetlinkError::io("setsockopt(NETLINK_ADD_MEMBERSHIP)"));
        }
        Ok(())
    }

    /// Start a request message for this family's `cmd`.
    pub fn request(&mut self, cmd: u8, flags: u16) -> (MsgBuilder, MsgRef) {
        let mut msg = MsgBuilder::new();
        let seq = self.sock.next_seq();
        let m = msg.message(self.family_id, NLM_F_REQUEST | flags, seq);
        msg.push_u8(cmd);
        msg.push_u8(0); // genl version
        msg.push_u16(0);
        (msg, m)
    }

    /// Send a finished request and await its ACK.
    pub fn request_ack(&mut self, msg: MsgBuilder) -> Result<(), NetlinkError> {
        self.sock.send(&msg)?;
        self.sock.receive_ack()
    }

    /// Send a plain (non-dump) request and parse its response messages.
    pub fn query<B, F>(&mut self, cmd: u8, build: B, mut callback: F) -> Result<(), NetlinkError>
    where
        B: FnOnce(&mut MsgBuilder),
        F: FnMut(&AttrSet) -> Result<(), NetlinkError>,
    {
        let (mut msg, m) = self.request(cmd, 0);
        build(&mut msg);
        msg.finish(m);
        self.sock.send(&msg)?;

        let family_id = self.family_id;
        self.sock.receive(GENL_HDRLEN, self.max_attrs, |header, _genl, attrs| {
            if header.mtype != family_id {
                return Err(NetlinkError::UnexpectedMessage { mtype: header.mtype });
            }
            callback(attrs)
        })
    }

    /// Issue a DUMP of `cmd`; `build` may add attributes to the request.
    pub fn dump<B, F>(&mut self, cmd: u8, build: B, mut callback: F) -> Result<(), NetlinkError>
    where
        B: FnOnce(&mut MsgBuilder),
        F: FnMut(&AttrSet) -> Result<(), NetlinkError>,
    {
        let (mut msg, m) = self.request(cmd, NLM_F_DUMP);
        build(&mut msg);
        msg.finish(m);
        self.sock.send(&msg)?;

        let family_id = self.family_id;
        self.sock.receive(GENL_HDRLEN, self.max_attrs, |header, _genl, attrs| {
            if header.mtype != family_id {
                return Err(NetlinkError::UnexpectedMessage { mtype: header.mtype });
            }
            callback(attrs)
        })
    }

    /// Receive notification messages (after [`GenlFamily::add_membership`]).
    /// The callback gets the generic netlink command and the attributes.
    pub fn receive_notifications<F>(&self, mut callback: F) -> Result<(), NetlinkError>
    where
        F: FnMut(u8, &AttrSet) -> Result<(), NetlinkError>,
    {
        let family_id = self.family_id;
        self.sock.receive(GENL_HDRLEN, self.max_attrs, |header, genl, attrs| {
            if header.mtype != family_id {
                warn!(mtype = header.mtype, "unexpected netlink message type");
                return Ok(());
            }
            callback(genl[0], attrs)
        })
    }
}
