use std::net::Ipv4Addr;

use wire::{BufferError, ReadBuffer, Readable, WriteBuffer, Writeable};

use crate::constants::DHCP_MAGIC_COOKIE;
use crate::types::{DhcpOption, Header, MessageType};

/// A complete DHCP message. The same field layout is used in both
/// directions.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub options: Vec<DhcpOption>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Message { header, options: Vec::new() }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn host_name(&self) -> Option<&str> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::HostName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Key identifying the client across requests: the Client-Identifier
    /// option when present, the hardware address otherwise.
    pub fn client_id(&self) -> String {
        self.options
            .iter()
            .find_map(|option| match option {
                DhcpOption::ClientIdentifier(id) => {
                    let hex: Vec<String> = id.iter().map(|b| format!("{b:02x}")).collect();
                    Some(hex.join(":"))
                }
                _ => None,
            })
            .unwrap_or_else(|| self.header.chaddr.to_string())
    }
}

impl Readable for Message {
    fn read(buf: &mut ReadBuffer) -> Result<Self, BufferError> {
        let header = Header::read(buf)?;
        if u32::read(buf)? != DHCP_MAGIC_COOKIE {
            return Err(BufferError::InvalidData);
        }
        let mut options = Vec::new();
        while let Some(option) = DhcpOption::read(buf)? {
            options.push(option);
        }
        // Messages may be padded with zeroes past the End option.
        Ok(Message { header, options })
    }
}

impl Writeable for Message {
    fn write(&self, buf: &mut WriteBuffer) -> Result<(), BufferError> {
        self.header.write(buf)?;
        DHCP_MAGIC_COOKIE.write(buf)?;
        for option in &self.options {
            option.write(buf);
        }
        buf.push(255); // End
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpCode;
    use netcfg::MacAddr;

    #[test]
    fn round_trip_with_options() {
        let mut message = Message::new(Header {
            xid: 0xcafe,
            chaddr: MacAddr([2, 4, 6, 8, 10, 12]),
            ..Header::default()
        });
        message.options.push(DhcpOption::MessageType(MessageType::Discover));
        message
            .options
            .push(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));

        let mut buf = WriteBuffer::new();
        message.write(&mut buf).unwrap();

        let mut rd = ReadBuffer::new(buf.bytes());
        let parsed = Message::read(&mut rd).unwrap();
        assert_eq!(parsed.header.xid, 0xcafe);
        assert_eq!(parsed.message_type(), Some(MessageType::Discover));
        assert_eq!(parsed.requested_ip(), Some(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[test]
    fn bad_cookie_is_rejected() {
        let mut buf = WriteBuffer::new();
        Header::default().write(&mut buf).unwrap();
        0xdeadbeefu32.write(&mut buf).unwrap();
        buf.push(255);

        let mut rd = ReadBuffer::new(buf.bytes());
        assert_eq!(Message::read(&mut rd).unwrap_err(), BufferError::InvalidData);
    }

    #[test]
    fn client_id_falls_back_to_mac() {
        let message = Message::new(Header {
            opcode: OpCode::BootRequest,
            chaddr: MacAddr([0xaa, 0xbb, 0xcc, 0, 0, 1]),
            ..Header::default()
        });
        assert_eq!(message.client_id(), "aa:bb:cc:00:00:01");

        let mut with_id = message.clone();
        with_id.options.push(DhcpOption::ClientIdentifier(vec![1, 0xaa]));
        assert_eq!(with_id.client_id(), "01:aa");
    }
}
