use crate::consts::*;

/// Assembles netlink messages: 16-byte headers, host-endian fixed structs
/// and 4-byte-aligned TLV attributes. One builder may hold several messages
/// back to back, which is how nftables batches are shipped.
#[derive(Default)]
pub struct MsgBuilder {
    buf: Vec<u8>,
}

/// Offset of a message header inside the builder, used to patch
/// `nlmsg_len` once the payload is complete.
#[derive(Debug, Clone, Copy)]
pub struct MsgRef(usize);

impl MsgBuilder {
    pub fn new() -> Self {
        MsgBuilder { buf: Vec::with_capacity(256) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Begin a message. `nlmsg_len` is patched by [`MsgBuilder::finish`].
    pub fn message(&mut self, mtype: u16, flags: u16, seq: u32) -> MsgRef {
        let offset = self.buf.len();
        self.push_u32(0); // nlmsg_len, patched later
        self.push_u16(mtype);
        self.push_u16(flags);
        self.push_u32(seq);
        self.push_u32(0); // nlmsg_pid
        MsgRef(offset)
    }

    pub fn finish(&mut self, msg: MsgRef) {
        let len = (self.buf.len() - msg.0) as u32;
        self.buf[msg.0..msg.0 + 4].copy_from_slice(&len.to_ne_bytes());
    }

    /// Grow a finished message's `nlmsg_len` by `extra` bytes that will be
    /// shipped out of band (see `NetlinkSocket::send_with_attr`).
    pub fn grow_len(&mut self, msg: MsgRef, extra: u32) {
        let len = u32::from_ne_bytes(self.buf[msg.0..msg.0 + 4].try_into().unwrap()) + extra;
        self.buf[msg.0..msg.0 + 4].copy_from_slice(&len.to_ne_bytes());
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn push_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn push_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u32_be(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn align(&mut self) {
        while self.buf.len() % NLA_ALIGNTO != 0 {
            self.buf.push(0);
        }
    }

    /// A TLV attribute. `nla_len` excludes trailing padding.
    pub fn attr(&mut self, atype: u16, payload: &[u8]) {
        self.align();
        self.push_u16((NLA_HDRLEN + payload.len()) as u16);
        self.push_u16(atype);
        self.push_bytes(payload);
        self.align();
    }

    pub fn attr_u8(&mut self, atype: u16, v: u8) {
        self.attr(atype, &[v]);
    }

    pub fn attr_u16(&mut self, atype: u16, v: u16) {
        self.attr(atype, &v.to_ne_bytes());
    }

    pub fn attr_u32(&mut self, atype: u16, v: u32) {
        self.attr(atype, &v.to_ne_bytes());
    }

    pub fn attr_u32_be(&mut self, atype: u16, v: u32) {
        self.attr(atype, &v.to_be_bytes());
    }

    pub fn attr_u16_be(&mut self, atype: u16, v: u16) {
        self.attr(atype, &v.to_be_bytes());
    }

    /// Zero-length flag attribute.
    pub fn attr_flag(&mut self, atype: u16) {
        self.attr(atype, &[]);
    }

    /// NUL-terminated string attribute.
    pub fn attr_str(&mut self, atype: u16, s: &str) {
        self.align();
        self.push_u16((NLA_HDRLEN + s.len() + 1) as u16);
        self.push_u16(atype);
        self.push_bytes(s.as_bytes());
        self.push_u8(0);
        self.align();
    }

    /// Begin a nested attribute; close with [`MsgBuilder::end_nested`].
    pub fn begin_nested(&mut self, atype: u16) -> MsgRef {
        self.align();
        let offset = self.buf.len();
        self.push_u16(0); // nla_len, patched later
        self.push_u16(atype | NLA_F_NESTED);
        MsgRef(offset)
    }

    pub fn end_nested(&mut self, nested: MsgRef) {
        let len = (self.buf.len() - nested.0) as u16;
        self.buf[nested.0..nested.0 + 2].copy_from_slice(&len.to_ne_bytes());
        self.align();
    }
}
