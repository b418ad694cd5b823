use std::os::fd::RawFd;

use netlink::consts::*;
use netlink::{MsgBuilder, NetlinkError, NetlinkSocket};

use crate::consts::*;
use crate::NftError;

/// Number of the nfqueue used to intercept traffic.
pub const QUEUE_NUMBER: u16 = 1337;

/// One packet handed to userspace for a verdict.
pub struct QueuedPacket {
    /// Kernel packet id, network byte order as received.
    pub packet_id_be: u32,
    pub payload: Vec<u8>,
}

/// The netlink connection the firewall worker reads enqueued packets from
/// and writes verdicts to.
pub struct NfqueueSocket {
    sock: NetlinkSocket,
}

impl NfqueueSocket {
    /// Connect, bind to [`QUEUE_NUMBER`] and request whole-packet copies
    /// with GSO aggregation.
    pub fn open() -> Result<Self, NftError> {
        let mut sock = NetlinkSocket::connect(NETLINK_NETFILTER)?;

        let mut msg = MsgBuilder::new();
        let seq = sock.next_seq();
        let m = msg.message(
            nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_CONFIG),
            NLM_F_REQUEST,
            seq,
        );
        Self::nfgenmsg(&mut msg);
        // nfqnl_msg_config_cmd: command, pad, pf.
        msg.attr(NFQA_CFG_CMD, &[NFQNL_CFG_CMD_BIND, 0, 0, 0]);
        msg.finish(m);
        sock.send(&msg)?;

        let mut msg = MsgBuilder::new();
        let seq = sock.next_seq();
        let m = msg.message(
            nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_CONFIG),
            NLM_F_REQUEST,
            seq,
        );
        Self::nfgenmsg(&mut msg);
        // nfqnl_msg_config_params: copy_range (big-endian), copy_mode.
        let mut params = [0u8; 5];
        params[..4].copy_from_slice(&0xffffu32.to_be_bytes());
        params[4] = NFQNL_COPY_PACKET;
        msg.attr(NFQA_CFG_PARAMS, &params);
        msg.attr(NFQA_CFG_FLAGS, &NFQA_CFG_F_GSO.to_be_bytes());
        msg.attr(NFQA_CFG_MASK, &NFQA_CFG_F_GSO.to_be_bytes());
        msg.finish(m);
        sock.send(&msg)?;

        Ok(NfqueueSocket { sock })
    }

    fn nfgenmsg(msg: &mut MsgBuilder) {
        msg.push_u8(NFPROTO_UNSPEC);
        msg.push_u8(NFNETLINK_V0);
        msg.push_u16_be(QUEUE_NUMBER); // res_id
    }

    pub fn fd(&self) -> RawFd {
        self.sock.fd()
    }

    /// Blocking receive of enqueued packets; calls `handle` for each one.
    pub fn receive_packets<F>(&self, mut handle: F) -> Result<(), NftError>
    where
        F: FnMut(QueuedPacket),
    {
        let expected = nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_PACKET);
        self.sock
            .receive(NFGENMSG_HDRLEN, NFQA_MAX, |header, _nfgen, attrs| {
                if header.mtype != expected {
                    return Err(NetlinkError::UnexpectedMessage { mtype: header.mtype });
                }
                let phdr = attrs
                    .get(NFQA_PACKET_HDR)
                    .ok_or(NetlinkError::Truncated { needed: 7, got: 0 })?;
                let payload = attrs
                    .get(NFQA_PAYLOAD)
                    .ok_or(NetlinkError::Truncated { needed: 1, got: 0 })?;
                handle(QueuedPacket {
                    packet_id_be: u32::from_ne_bytes(phdr[..4].try_into().unwrap()),
                    payload: payload.to_vec(),
                });
                Ok(())
            })
            .map_err(NftError::from)
    }

    fn verdict_message(&mut self, packet_id_be: u32, accept: bool) -> (MsgBuilder, netlink::MsgRef) {
        let mut msg = MsgBuilder::new();
        let seq = self.sock.next_seq();
        let m = msg.message(
            nfnl_msg_type(NFNL_SUBSYS_QUEUE, NFQNL_MSG_VERDICT),
            NLM_F_REQUEST,
            seq,
        );
        Self::nfgenmsg(&mut msg);
        // nfqnl_msg_verdict_hdr: verdict (big-endian), id (as received).
        msg.align();
        let verdict = if accept { NF_ACCEPT } else { NF_DROP };
        let mut vhdr = [0u8; 8];
        vhdr[..4].copy_from_slice(&verdict.to_be_bytes());
        vhdr[4..].copy_from_slice(&packet_id_be.to_ne_bytes());
        msg.attr(NFQA_VERDICT_HDR, &vhdr);
        (msg, m)
    }

    /// Issue a verdict without touching the payload.
    pub fn verdict(&mut self, packet_id_be: u32, accept: bool) -> Result<(), NftError> {
        let (mut msg, m) = self.verdict_message(packet_id_be, accept);
        msg.finish(m);
        self.sock.send(&msg)?;
        Ok(())
    }

    /// Accept with a mangled payload, shipped as one out-of-band attribute.
    pub fn verdict_with_payload(
        &mut self,
        packet_id_be: u32,
        payload: &[u8],
    ) -> Result<(), NftError> {
        let (mut msg, m) = self.verdict_message(packet_id_be, true);
        msg.finish(m);
        msg.grow_len(m, (NLA_HDRLEN + payload.len()) as u32);
        self.sock.send_with_attr(msg.bytes(), NFQA_PAYLOAD, payload)?;
        Ok(())
    }

    /// Bound the time the worker blocks in `recv` so it can observe the
    /// stop flag.
    pub fn set_receive_timeout(&self, timeout: std::time::Duration) -> Result<(), NftError> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let r = unsafe {
            libc::setsockopt(
                self.sock.fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if r < 0 {
            return Err(NftError::Netlink(NetlinkError::Io {
                call: "setsockopt(SO_RCVTIMEO)",
                source: std::io::Error::last_os_error(),
            }));
        }
        Ok(())
    }
}
