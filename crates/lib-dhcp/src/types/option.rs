use std::net::Ipv4Addr;

use wire::{BufferError, ReadBuffer, WriteBuffer};

/// Option codes from RFC 2132 that the server reads or emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DomainNameServer = 6,
    HostName = 12,
    DomainName = 15,
    RequestedIpAddress = 50,
    IpAddressLeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    ClientIdentifier = 61,
    End = 255,
}

/// DHCP message types carried by option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            1 => MessageType::Discover,
            2 => MessageType::Offer,
            3 => MessageType::Request,
            4 => MessageType::Decline,
            5 => MessageType::Ack,
            6 => MessageType::Nak,
            7 => MessageType::Release,
            8 => MessageType::Inform,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(v: MessageType) -> u8 {
        match v {
            MessageType::Discover => 1,
            MessageType::Offer => 2,
            MessageType::Request => 3,
            MessageType::Decline => 4,
            MessageType::Ack => 5,
            MessageType::Nak => 6,
            MessageType::Release => 7,
            MessageType::Inform => 8,
            MessageType::Unknown(other) => other,
        }
    }
}

/// One decoded option TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Ipv4Addr),
    DomainNameServer(Vec<Ipv4Addr>),
    HostName(String),
    DomainName(String),
    RequestedIpAddress(Ipv4Addr),
    IpAddressLeaseTime(u32),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    ClientIdentifier(Vec<u8>),
    /// Anything this server doesn't interpret; carried verbatim.
    Unknown { code: u8, data: Vec<u8> },
}

impl DhcpOption {
    pub fn code(&self) -> u8 {
        match self {
            DhcpOption::SubnetMask(_) => OptionCode::SubnetMask as u8,
            DhcpOption::Router(_) => OptionCode::Router as u8,
            DhcpOption::DomainNameServer(_) => OptionCode::DomainNameServer as u8,
            DhcpOption::HostName(_) => OptionCode::HostName as u8,
            DhcpOption::DomainName(_) => OptionCode::DomainName as u8,
            DhcpOption::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            DhcpOption::IpAddressLeaseTime(_) => OptionCode::IpAddressLeaseTime as u8,
            DhcpOption::MessageType(_) => OptionCode::MessageType as u8,
            DhcpOption::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            DhcpOption::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            DhcpOption::ClientIdentifier(_) => OptionCode::ClientIdentifier as u8,
            DhcpOption::Unknown { code, .. } => *code,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            DhcpOption::SubnetMask(ip)
            | DhcpOption::Router(ip)
            | DhcpOption::RequestedIpAddress(ip)
            | DhcpOption::ServerIdentifier(ip) => ip.octets().to_vec(),
            DhcpOption::DomainNameServer(ips) => {
                ips.iter().flat_map(|ip| ip.octets()).collect()
            }
            DhcpOption::HostName(s) | DhcpOption::DomainName(s) => s.as_bytes().to_vec(),
            DhcpOption::IpAddressLeaseTime(secs) => secs.to_be_bytes().to_vec(),
            DhcpOption::MessageType(t) => vec![u8::from(*t)],
            DhcpOption::ParameterRequestList(codes) => codes.clone(),
            DhcpOption::ClientIdentifier(id) => id.clone(),
            DhcpOption::Unknown { data, .. } => data.clone(),
        }
    }

    /// Number of bytes [`DhcpOption::write`] appends: code, length and
    /// payload.
    pub fn size(&self) -> usize {
        2 + self.payload().len()
    }

    pub fn write(&self, buf: &mut WriteBuffer) {
        let payload = self.payload();
        buf.push(self.code());
        buf.push(payload.len() as u8);
        buf.write_slice(&payload);
    }

    /// Read one option. `None` marks the End option; Pad bytes are
    /// skipped transparently.
    pub fn read(buf: &mut ReadBuffer) -> Result<Option<Self>, BufferError> {
        let code = loop {
            match buf.pop()? {
                0 => continue, // Pad
                255 => return Ok(None),
                code => break code,
            }
        };
        let len = buf.pop()? as usize;
        let data = buf.read_slice(len)?;

        let ip = |data: &[u8]| -> Result<Ipv4Addr, BufferError> {
            let bytes: [u8; 4] = data.try_into().map_err(|_| BufferError::InvalidData)?;
            Ok(Ipv4Addr::from(bytes))
        };

        let option = match code {
            1 => DhcpOption::SubnetMask(ip(data)?),
            3 => DhcpOption::Router(ip(data)?),
            6 => {
                if data.len() % 4 != 0 {
                    return Err(BufferError::InvalidData);
                }
                DhcpOption::DomainNameServer(
                    data.chunks_exact(4)
                        .map(|c| Ipv4Addr::from(<[u8; 4]>::try_from(c).unwrap()))
                        .collect(),
                )
            }
            12 => DhcpOption::HostName(String::from_utf8_lossy(data).into_owned()),
            15 => DhcpOption::DomainName(String::from_utf8_lossy(data).into_owned()),
            50 => DhcpOption::RequestedIpAddress(ip(data)?),
            51 => {
                let bytes: [u8; 4] = data.try_into().map_err(|_| BufferError::InvalidData)?;
                DhcpOption::IpAddressLeaseTime(u32::from_be_bytes(bytes))
            }
            53 => {
                let value = *data.first().ok_or(BufferError::InvalidData)?;
                DhcpOption::MessageType(MessageType::from(value))
            }
            54 => DhcpOption::ServerIdentifier(ip(data)?),
            55 => DhcpOption::ParameterRequestList(data.to_vec()),
            61 => DhcpOption::ClientIdentifier(data.to_vec()),
            code => DhcpOption::Unknown { code, data: data.to_vec() },
        };
        Ok(Some(option))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(option: DhcpOption) {
        let mut buf = WriteBuffer::new();
        option.write(&mut buf);
        assert_eq!(buf.len(), option.size());

        let mut rd = ReadBuffer::new(buf.bytes());
        let parsed = DhcpOption::read(&mut rd).unwrap().unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn size_matches_written_bytes() {
        round_trip(DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)));
        round_trip(DhcpOption::Router(Ipv4Addr::new(192, 168, 1, 1)));
        round_trip(DhcpOption::DomainNameServer(vec![
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(8, 8, 8, 8),
        ]));
        round_trip(DhcpOption::HostName("laptop".to_string()));
        round_trip(DhcpOption::DomainName("lan".to_string()));
        round_trip(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));
        round_trip(DhcpOption::IpAddressLeaseTime(60));
        round_trip(DhcpOption::MessageType(MessageType::Discover));
        round_trip(DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 1)));
        round_trip(DhcpOption::ParameterRequestList(vec![1, 3, 6, 15]));
        round_trip(DhcpOption::ClientIdentifier(vec![1, 0xaa, 0xbb, 0xcc, 0, 0, 1]));
        round_trip(DhcpOption::Unknown { code: 43, data: vec![1, 2, 3] });
    }

    #[test]
    fn pad_bytes_are_skipped() {
        let bytes = [0u8, 0, 53, 1, 1, 255];
        let mut rd = ReadBuffer::new(&bytes);
        let parsed = DhcpOption::read(&mut rd).unwrap().unwrap();
        assert_eq!(parsed, DhcpOption::MessageType(MessageType::Discover));
        assert_eq!(DhcpOption::read(&mut rd).unwrap(), None);
    }

    #[test]
    fn truncated_option_is_an_error() {
        let bytes = [50u8, 4, 192, 168];
        let mut rd = ReadBuffer::new(&bytes);
        assert!(DhcpOption::read(&mut rd).is_err());
    }
}
