use std::net::Ipv4Addr;

use netcfg::MacAddr;
use wire::{BufferError, ReadBuffer, Readable, WriteBuffer, Writeable};

/// Packet op code / message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// 1 for BOOTREQUEST.
    BootRequest,
    /// 2 for BOOTREPLY.
    BootReply,
}

impl Readable for OpCode {
    fn read(buf: &mut ReadBuffer) -> Result<Self, BufferError> {
        match buf.pop()? {
            1 => Ok(OpCode::BootRequest),
            2 => Ok(OpCode::BootReply),
            _ => Err(BufferError::InvalidData),
        }
    }
}

impl Writeable for OpCode {
    fn write(&self, buf: &mut WriteBuffer) -> Result<(), BufferError> {
        buf.push(match self {
            OpCode::BootRequest => 1,
            OpCode::BootReply => 2,
        });
        Ok(())
    }
}

/// The fixed 236-byte BOOTP header preceding the magic cookie.
///
/// ### See
///
/// RFC 2131 - Section 2 - Protocol Summary:
/// https://datatracker.ietf.org/doc/html/rfc2131#section-2
#[derive(Debug, Clone)]
pub struct Header {
    pub opcode: OpCode,

    /// Hardware address type, see ARP section in "Assigned Numbers" RFC.
    pub htype: u8,

    /// Hardware address length.
    pub hlen: u8,

    /// Number of hops, optionally used by relay agents.
    pub hops: u8,

    /// Transaction ID, used to match this boot request with the responses
    /// it generates.
    pub xid: u32,

    /// Seconds elapsed since the client started trying to boot.
    pub secs: u16,

    pub flags: u16,

    /// Client IP address; filled in when the client can answer ARP.
    pub ciaddr: Ipv4Addr,

    /// 'Your' (client) IP address assigned by the server.
    pub yiaddr: Ipv4Addr,

    /// IP address of the next server to use in bootstrap.
    pub siaddr: Ipv4Addr,

    /// Relay agent IP address.
    pub giaddr: Ipv4Addr,

    /// Client hardware address (first 6 of 16 octets).
    pub chaddr: MacAddr,

    /// Optional server host name, null terminated (64 octets).
    pub sname: Vec<u8>,

    /// Boot file name, null terminated (128 octets).
    pub file: Vec<u8>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            opcode: OpCode::BootRequest,
            htype: 1, // Ethernet
            hlen: 6,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddr::default(),
            sname: vec![0; 64],
            file: vec![0; 128],
        }
    }
}

fn read_ip(buf: &mut ReadBuffer) -> Result<Ipv4Addr, BufferError> {
    Ok(Ipv4Addr::from(buf.read_array::<4>()?))
}

impl Readable for Header {
    fn read(buf: &mut ReadBuffer) -> Result<Self, BufferError> {
        let opcode = OpCode::read(buf)?;
        let htype = buf.pop()?;
        let hlen = buf.pop()?;
        let hops = buf.pop()?;
        let xid = u32::read(buf)?;
        let secs = u16::read(buf)?;
        let flags = u16::read(buf)?;
        let ciaddr = read_ip(buf)?;
        let yiaddr = read_ip(buf)?;
        let siaddr = read_ip(buf)?;
        let giaddr = read_ip(buf)?;
        let chaddr = MacAddr(buf.read_array::<6>()?);
        buf.skip(10)?; // remainder of the 16-octet chaddr field
        let sname = buf.read_vec(64)?;
        let file = buf.read_vec(128)?;

        Ok(Header {
            opcode,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
        })
    }
}

impl Writeable for Header {
    fn write(&self, buf: &mut WriteBuffer) -> Result<(), BufferError> {
        self.opcode.write(buf)?;
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        self.xid.write(buf)?;
        self.secs.write(buf)?;
        self.flags.write(buf)?;
        buf.write_slice(&self.ciaddr.octets());
        buf.write_slice(&self.yiaddr.octets());
        buf.write_slice(&self.siaddr.octets());
        buf.write_slice(&self.giaddr.octets());
        buf.write_slice(self.chaddr.bytes());
        buf.write_zeroes(10);
        buf.write_slice(&self.sname[..64.min(self.sname.len())]);
        buf.write_zeroes(64usize.saturating_sub(self.sname.len()));
        buf.write_slice(&self.file[..128.min(self.file.len())]);
        buf.write_zeroes(128usize.saturating_sub(self.file.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HEADER_SIZE;

    #[test]
    fn header_is_236_bytes() {
        let mut buf = WriteBuffer::new();
        Header::default().write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn round_trip() {
        let header = Header {
            opcode: OpCode::BootRequest,
            xid: 0x12345678,
            ciaddr: Ipv4Addr::new(192, 168, 1, 7),
            chaddr: MacAddr([0xaa, 0xbb, 0xcc, 0, 0, 1]),
            ..Header::default()
        };
        let mut buf = WriteBuffer::new();
        header.write(&mut buf).unwrap();

        let mut rd = ReadBuffer::new(buf.bytes());
        let parsed = Header::read(&mut rd).unwrap();
        assert_eq!(parsed.xid, 0x12345678);
        assert_eq!(parsed.ciaddr, Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(parsed.chaddr, MacAddr([0xaa, 0xbb, 0xcc, 0, 0, 1]));
    }
}
