//! A first-contact DHCP exchange, driven through the wire format.

use std::net::Ipv4Addr;
use std::time::Instant;

use dhcp::types::{DhcpOption, Header, Message, MessageType};
use dhcp::{Server, ServerConfig};
use netcfg::{EtcSnapshot, Ipv4Net, MacAddr};
use wire::{ReadBuffer, Readable, WriteBuffer, Writeable};

fn server() -> Server {
    Server::start(
        ServerConfig {
            lan_ip: Ipv4Addr::new(192, 168, 1, 1),
            lan_network: Ipv4Net::new(
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(255, 255, 255, 0),
            ),
            device: None,
            port: 0,
            domain: "lan".to_string(),
            install_arp_entries: false,
        },
        &EtcSnapshot::default(),
    )
    .unwrap()
}

fn encode(message: &Message) -> Vec<u8> {
    let mut buf = WriteBuffer::new();
    message.write(&mut buf).unwrap();
    buf.into_vec()
}

fn decode(bytes: &[u8]) -> Message {
    let mut rd = ReadBuffer::new(bytes);
    Message::read(&mut rd).unwrap()
}

fn option_u32(message: &Message, pick: fn(&DhcpOption) -> Option<u32>) -> Option<u32> {
    message.options.iter().find_map(pick)
}

#[test]
fn discover_offer_request_ack() {
    let mut server = server();
    let now = Instant::now();
    let mac = MacAddr([0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]);

    // Broadcast DISCOVER, as it arrives on the wire.
    let mut discover = Message::new(Header {
        xid: 0x12345678,
        chaddr: mac,
        ..Header::default()
    });
    discover
        .options
        .push(DhcpOption::MessageType(MessageType::Discover));
    let wire_bytes = encode(&discover);
    let parsed = decode(&wire_bytes);

    let reply = server
        .handle_message(&parsed, Ipv4Addr::UNSPECIFIED, now)
        .unwrap()
        .expect("DISCOVER deserves an OFFER");
    assert_eq!(reply.dest, Ipv4Addr::new(192, 168, 1, 2));
    assert_eq!(reply.install_arp, Some(mac));

    let offer = decode(&reply.payload);
    assert_eq!(offer.message_type(), Some(MessageType::Offer));
    assert_eq!(offer.header.xid, 0x12345678);
    assert_eq!(offer.header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
    assert_eq!(
        option_u32(&offer, |o| match o {
            DhcpOption::IpAddressLeaseTime(secs) => Some(*secs),
            _ => None,
        }),
        Some(10)
    );
    assert!(offer
        .options
        .contains(&DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0))));
    assert!(offer
        .options
        .contains(&DhcpOption::Router(Ipv4Addr::new(192, 168, 1, 1))));
    assert!(offer
        .options
        .contains(&DhcpOption::DomainName("lan".to_string())));
    assert!(offer
        .options
        .contains(&DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 1))));
    assert!(offer
        .options
        .contains(&DhcpOption::DomainNameServer(vec![Ipv4Addr::new(192, 168, 1, 1)])));

    // REQUEST for the offered address.
    let mut request = Message::new(Header {
        xid: 0x12345678,
        chaddr: mac,
        ..Header::default()
    });
    request
        .options
        .push(DhcpOption::MessageType(MessageType::Request));
    request
        .options
        .push(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));

    let reply = server
        .handle_message(&decode(&encode(&request)), Ipv4Addr::UNSPECIFIED, now)
        .unwrap()
        .expect("matching REQUEST deserves an ACK");
    let ack = decode(&reply.payload);
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
    assert_eq!(
        option_u32(&ack, |o| match o {
            DhcpOption::IpAddressLeaseTime(secs) => Some(*secs),
            _ => None,
        }),
        Some(60)
    );

    let lease = &server.leases()[&Ipv4Addr::new(192, 168, 1, 2)];
    assert_eq!(lease.client_id, "aa:bb:cc:00:00:01");
    assert!(!lease.stable);
}
