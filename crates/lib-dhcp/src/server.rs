use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use netcfg::{bind_udp, set_arp_entry, EtcSnapshot, Ipv4Net, MacAddr};
use reactor::ExpireQueue;
use tracing::{debug, error, info, warn};
use wire::{ReadBuffer, Readable, WriteBuffer, Writeable};

use crate::constants::*;
use crate::types::{DhcpOption, Header, Message, MessageType, OpCode};
use crate::DhcpError;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub lan_ip: Ipv4Addr,
    pub lan_network: Ipv4Net,
    /// Interface the socket is pinned to with `SO_BINDTODEVICE`.
    pub device: Option<String>,
    pub port: u16,
    /// Domain suffix handed out with every lease.
    pub domain: String,
    /// Install `(ip, mac)` into the kernel ARP table before answering
    /// clients that don't have an address yet.
    pub install_arp_entries: bool,
}

/// One address binding, keyed by IP in [`Server::leases`].
#[derive(Debug, Clone)]
pub struct Lease {
    pub client_id: String,
    pub hostname: Option<String>,
    /// Absent for stable `/etc/ethers` entries.
    pub expires: Option<Instant>,
    pub stable: bool,
    pub last_request: Option<Instant>,
}

/// A reply planned for one received message.
#[derive(Debug)]
pub struct Reply {
    pub dest: Ipv4Addr,
    pub payload: Vec<u8>,
    /// MAC to associate with `dest` before sending, for clients that can't
    /// answer ARP yet.
    pub install_arp: Option<MacAddr>,
}

/// The DHCP server: one UDP socket and the lease table.
pub struct Server {
    socket: UdpSocket,
    config: ServerConfig,
    leases: HashMap<Ipv4Addr, Lease>,
    expiry: ExpireQueue<Ipv4Addr>,
}

impl Server {
    /// Bind the server socket and seed stable leases from `/etc/ethers`.
    pub fn start(config: ServerConfig, etc: &EtcSnapshot) -> Result<Self, DhcpError> {
        let socket = bind_udp(config.port, config.device.as_deref(), false)?;
        let mut server = Server {
            socket,
            config,
            leases: HashMap::new(),
            expiry: ExpireQueue::new(),
        };
        server.reload_etc(etc);
        Ok(server)
    }

    /// Re-seed stable leases after `/etc/ethers` or `/etc/hosts` changed.
    /// Dynamic leases are left alone.
    pub fn reload_etc(&mut self, etc: &EtcSnapshot) {
        for (mac, ip) in &etc.ethers {
            let hostname = etc
                .hosts
                .get(ip)
                .and_then(|aliases| aliases.first())
                .cloned();
            self.expiry.remove(ip);
            self.leases.insert(
                *ip,
                Lease {
                    client_id: mac.to_string(),
                    hostname,
                    expires: None,
                    stable: true,
                    last_request: None,
                },
            );
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn leases(&self) -> &HashMap<Ipv4Addr, Lease> {
        &self.leases
    }

    /// Free addresses left in the pool. Network, broadcast and server
    /// addresses are reserved.
    pub fn available_ips(&self) -> i64 {
        (1i64 << self.config.lan_network.host_bits()) - self.leases.len() as i64 - 3
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiry.next_deadline()
    }

    /// Drop every lease whose expiration has passed.
    pub fn expire(&mut self, now: Instant) {
        while let Some(ip) = self.expiry.pop_expired(now) {
            if let Some(lease) = self.leases.remove(&ip) {
                debug!(%ip, client_id = %lease.client_id, "DHCP lease expired");
            }
        }
    }

    /// Drain the socket and answer every queued request.
    pub fn on_readable(&mut self) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(%err, "DHCP recv_from failed");
                    break;
                }
            };
            let source_ip = match src.ip() {
                std::net::IpAddr::V4(ip) => ip,
                std::net::IpAddr::V6(_) => continue,
            };
            self.expire(Instant::now());
            if let Err(err) = self.handle_packet(&buf[..len], source_ip) {
                error!(%err, %source_ip, "dropping DHCP request");
            }
        }
    }

    fn handle_packet(&mut self, buf: &[u8], source_ip: Ipv4Addr) -> Result<(), DhcpError> {
        let mut rd = ReadBuffer::new(buf);
        let message = Message::read(&mut rd)?;
        let Some(reply) = self.handle_message(&message, source_ip, Instant::now())? else {
            return Ok(());
        };
        if let Some(mac) = reply.install_arp {
            if self.config.install_arp_entries {
                let device = self.config.device.as_deref().unwrap_or_default();
                set_arp_entry(self.socket.as_raw_fd(), device, reply.dest, mac)
                    .map_err(DhcpError::ArpFailed)?;
            }
        }
        self.socket.send_to(&reply.payload, (reply.dest, CLIENT_PORT))?;
        Ok(())
    }

    /// Decide how to answer one message. Everything except socket and ARP
    /// side effects happens here.
    pub fn handle_message(
        &mut self,
        message: &Message,
        source_ip: Ipv4Addr,
        now: Instant,
    ) -> Result<Option<Reply>, DhcpError> {
        // Silently ignore packets meant for a different DHCP server.
        if message.header.siaddr != Ipv4Addr::UNSPECIFIED
            && message.header.siaddr != self.config.lan_ip
        {
            return Ok(None);
        }

        let client_id = message.client_id();
        let message_type = match message.message_type() {
            Some(t) => t,
            None => {
                warn!("DHCP message without a message type option");
                return Ok(None);
            }
        };

        let (response_type, chosen_ip, lease_secs) = match message_type {
            MessageType::Release => {
                let ip = message.header.ciaddr;
                let owned = self
                    .leases
                    .get(&ip)
                    .is_some_and(|lease| lease.client_id == client_id);
                if owned {
                    self.leases.remove(&ip);
                    self.expiry.remove(&ip);
                    info!(%ip, %client_id, "DHCP lease released");
                }
                return Ok(None);
            }
            MessageType::Inform => {
                let ip = message.header.ciaddr;
                if !self.is_valid_client_ip(ip) {
                    return Err(DhcpError::InvalidRequest(format!(
                        "INFORM for invalid address {ip}"
                    )));
                }
                if source_ip != ip && source_ip != Ipv4Addr::UNSPECIFIED {
                    return Err(DhcpError::InvalidRequest(format!(
                        "INFORM source {source_ip} does not match client address {ip}"
                    )));
                }
                (MessageType::Ack, ip, None)
            }
            MessageType::Discover => {
                let ip = self.choose_ip(message, &client_id, now)?;
                (MessageType::Offer, ip, Some(OFFER_LEASE_SECS))
            }
            MessageType::Request => {
                let ip = self.choose_ip(message, &client_id, now)?;
                match message.requested_ip() {
                    Some(requested) if requested != ip => {
                        (MessageType::Nak, ip, Some(ACK_LEASE_SECS))
                    }
                    _ => (MessageType::Ack, ip, Some(ACK_LEASE_SECS)),
                }
            }
            other => {
                info!(?other, "unhandled DHCP message type");
                return Ok(None);
            }
        };

        if !self.is_valid_client_ip(chosen_ip) {
            return Err(DhcpError::InvalidRequest(format!(
                "chosen address {chosen_ip} is not usable"
            )));
        }

        let inform = message_type == MessageType::Inform;
        let mut response = Message::new(Header {
            opcode: OpCode::BootReply,
            xid: message.header.xid,
            yiaddr: if inform { Ipv4Addr::UNSPECIFIED } else { chosen_ip },
            siaddr: self.config.lan_ip,
            chaddr: message.header.chaddr,
            ..Header::default()
        });
        response.options.push(DhcpOption::MessageType(response_type));
        response
            .options
            .push(DhcpOption::SubnetMask(self.config.lan_network.mask));
        response.options.push(DhcpOption::Router(self.config.lan_ip));
        if let Some(secs) = lease_secs {
            response.options.push(DhcpOption::IpAddressLeaseTime(secs));
        }
        response
            .options
            .push(DhcpOption::DomainName(self.config.domain.clone()));
        response
            .options
            .push(DhcpOption::ServerIdentifier(self.config.lan_ip));
        response
            .options
            .push(DhcpOption::DomainNameServer(vec![self.config.lan_ip]));

        let mut payload = WriteBuffer::new();
        response.write(&mut payload).expect("in-memory write");

        if matches!(response_type, MessageType::Offer | MessageType::Ack) && !inform {
            let expires = now + Duration::from_secs(lease_secs.unwrap_or(0) as u64);
            self.expiry.update(chosen_ip, expires);
            self.leases.insert(
                chosen_ip,
                Lease {
                    client_id,
                    hostname: message.host_name().map(str::to_string),
                    expires: Some(expires),
                    stable: false,
                    last_request: Some(now),
                },
            );
        }

        Ok(Some(Reply {
            dest: chosen_ip,
            payload: payload.into_vec(),
            install_arp: (source_ip == Ipv4Addr::UNSPECIFIED)
                .then_some(message.header.chaddr),
        }))
    }

    /// Addresses a client may hold: inside the LAN network, not the
    /// network, broadcast or server address.
    fn is_valid_client_ip(&self, ip: Ipv4Addr) -> bool {
        let net = &self.config.lan_network;
        net.contains(ip) && ip != net.addr && ip != net.broadcast() && ip != self.config.lan_ip
    }

    /// Pick the address for a client, in order of preference: its existing
    /// lease, its requested address, the first unused address, the most
    /// expired lease.
    fn choose_ip(
        &self,
        message: &Message,
        client_id: &str,
        now: Instant,
    ) -> Result<Ipv4Addr, DhcpError> {
        // Sticky leases: a returning client gets its previous address.
        if let Some((ip, _)) = self
            .leases
            .iter()
            .find(|(_, lease)| lease.client_id == client_id)
        {
            return Ok(*ip);
        }

        if let Some(requested) = message.requested_ip() {
            let mut ok = self.is_valid_client_ip(requested);
            if let Some(owner) = self.leases.get(&requested) {
                let owner_expired = owner.expires.is_some_and(|expires| expires <= now);
                if owner.client_id != client_id && !owner_expired {
                    ok = false;
                }
            }
            if ok {
                return Ok(requested);
            }
        }

        for ip in self.config.lan_network.hosts() {
            if ip == self.config.lan_ip {
                continue;
            }
            if !self.leases.contains_key(&ip) {
                return Ok(ip);
            }
        }

        // The pool is full: evict whoever expired the longest ago.
        let oldest = self
            .leases
            .iter()
            .filter_map(|(ip, lease)| lease.expires.map(|expires| (expires, *ip)))
            .min();
        if let Some((expires, ip)) = oldest {
            if expires < now {
                return Ok(ip);
            }
        }
        Err(DhcpError::NoIpAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Server {
        let config = ServerConfig {
            lan_ip: Ipv4Addr::new(192, 168, 1, 1),
            lan_network: Ipv4Net::new(
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(255, 255, 255, 0),
            ),
            device: None,
            port: 0,
            domain: "lan".to_string(),
            install_arp_entries: false,
        };
        Server::start(config, &EtcSnapshot::default()).unwrap()
    }

    fn request(mac: [u8; 6], xid: u32, message_type: MessageType) -> Message {
        let mut message = Message::new(Header {
            xid,
            chaddr: MacAddr(mac),
            ..Header::default()
        });
        message.options.push(DhcpOption::MessageType(message_type));
        message
    }

    fn parse(reply: &Reply) -> Message {
        let mut rd = ReadBuffer::new(&reply.payload);
        Message::read(&mut rd).unwrap()
    }

    fn lease_time(message: &Message) -> Option<u32> {
        message.options.iter().find_map(|option| match option {
            DhcpOption::IpAddressLeaseTime(secs) => Some(*secs),
            _ => None,
        })
    }

    #[test]
    fn first_contact_discover_then_request() {
        let mut server = test_server();
        let now = Instant::now();
        let mac = [0xaa, 0xbb, 0xcc, 0, 0, 1];

        let discover = request(mac, 0x12345678, MessageType::Discover);
        let reply = server
            .handle_message(&discover, Ipv4Addr::UNSPECIFIED, now)
            .unwrap()
            .unwrap();
        let offer = parse(&reply);
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.header.xid, 0x12345678);
        assert_eq!(offer.header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(lease_time(&offer), Some(10));
        assert!(offer.options.contains(&DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0))));
        assert!(offer.options.contains(&DhcpOption::Router(Ipv4Addr::new(192, 168, 1, 1))));
        assert!(offer
            .options
            .contains(&DhcpOption::DomainNameServer(vec![Ipv4Addr::new(192, 168, 1, 1)])));
        // Client with no address yet: ARP entry required before replying.
        assert_eq!(reply.install_arp, Some(MacAddr(mac)));

        let mut req = request(mac, 0x12345678, MessageType::Request);
        req.options
            .push(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));
        let reply = server
            .handle_message(&req, Ipv4Addr::UNSPECIFIED, now)
            .unwrap()
            .unwrap();
        let ack = parse(&reply);
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(lease_time(&ack), Some(60));
        let lease = &server.leases()[&Ipv4Addr::new(192, 168, 1, 2)];
        assert_eq!(lease.client_id, "aa:bb:cc:00:00:01");
    }

    #[test]
    fn request_for_wrong_ip_is_nacked() {
        let mut server = test_server();
        let now = Instant::now();
        let mac_a = [0xaa, 0, 0, 0, 0, 1];
        let mac_b = [0xaa, 0, 0, 0, 0, 2];

        // A owns .2.
        let mut req = request(mac_a, 1, MessageType::Request);
        req.options
            .push(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));
        server.handle_message(&req, Ipv4Addr::UNSPECIFIED, now).unwrap();

        // B asks for .2 while A's lease is fresh: gets NAK with .3 chosen.
        let mut req = request(mac_b, 2, MessageType::Request);
        req.options
            .push(DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 1, 2)));
        let reply = server
            .handle_message(&req, Ipv4Addr::UNSPECIFIED, now)
            .unwrap()
            .unwrap();
        assert_eq!(parse(&reply).message_type(), Some(MessageType::Nak));
    }

    #[test]
    fn sticky_leases_survive_new_discovers() {
        let mut server = test_server();
        let now = Instant::now();
        let mac = [0xaa, 0, 0, 0, 0, 1];

        let discover = request(mac, 1, MessageType::Discover);
        let first = server
            .handle_message(&discover, Ipv4Addr::UNSPECIFIED, now)
            .unwrap()
            .unwrap();
        let second = server
            .handle_message(&discover, Ipv4Addr::UNSPECIFIED, now)
            .unwrap()
            .unwrap();
        assert_eq!(parse(&first).header.yiaddr, parse(&second).header.yiaddr);
    }

    #[test]
    fn release_deletes_matching_lease_only() {
        let mut server = test_server();
        let now = Instant::now();
        let mac = [0xaa, 0, 0, 0, 0, 1];
        let ip = Ipv4Addr::new(192, 168, 1, 2);

        let discover = request(mac, 1, MessageType::Discover);
        server.handle_message(&discover, Ipv4Addr::UNSPECIFIED, now).unwrap();
        assert!(server.leases().contains_key(&ip));

        // A release from a different client id is ignored.
        let mut foreign = request([0xbb, 0, 0, 0, 0, 2], 2, MessageType::Release);
        foreign.header.ciaddr = ip;
        server.handle_message(&foreign, ip, now).unwrap();
        assert!(server.leases().contains_key(&ip));

        let mut release = request(mac, 3, MessageType::Release);
        release.header.ciaddr = ip;
        server.handle_message(&release, ip, now).unwrap();
        assert!(!server.leases().contains_key(&ip));
    }

    #[test]
    fn inform_answers_config_without_lease() {
        let mut server = test_server();
        let now = Instant::now();
        let ip = Ipv4Addr::new(192, 168, 1, 50);

        let mut inform = request([0xaa, 0, 0, 0, 0, 1], 1, MessageType::Inform);
        inform.header.ciaddr = ip;
        let reply = server.handle_message(&inform, ip, now).unwrap().unwrap();
        let ack = parse(&reply);
        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(lease_time(&ack), None);
        assert_eq!(ack.header.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(server.leases().is_empty());

        // Mismatched source address is rejected.
        let err = server
            .handle_message(&inform, Ipv4Addr::new(192, 168, 1, 51), now)
            .unwrap_err();
        assert!(matches!(err, DhcpError::InvalidRequest(_)));
    }

    #[test]
    fn foreign_server_packets_are_dropped_silently() {
        let mut server = test_server();
        let mut discover = request([0xaa, 0, 0, 0, 0, 1], 1, MessageType::Discover);
        discover.header.siaddr = Ipv4Addr::new(10, 0, 0, 1);
        let reply = server
            .handle_message(&discover, Ipv4Addr::UNSPECIFIED, Instant::now())
            .unwrap();
        assert!(reply.is_none());
    }

    #[test]
    fn stable_entries_resist_allocation() {
        let mut etc = EtcSnapshot::default();
        etc.parse_hosts("192.168.1.2 printer\n");
        etc.parse_ethers("aa:bb:cc:00:00:99 printer\n");

        let config = ServerConfig {
            lan_ip: Ipv4Addr::new(192, 168, 1, 1),
            lan_network: Ipv4Net::new(
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(255, 255, 255, 0),
            ),
            device: None,
            port: 0,
            domain: "lan".to_string(),
            install_arp_entries: false,
        };
        let mut server = Server::start(config, &etc).unwrap();
        let lease = &server.leases()[&Ipv4Addr::new(192, 168, 1, 2)];
        assert!(lease.stable);
        assert_eq!(lease.hostname.as_deref(), Some("printer"));

        // A different client skips the stable address.
        let discover = request([0xaa, 0, 0, 0, 0, 1], 1, MessageType::Discover);
        let reply = server
            .handle_message(&discover, Ipv4Addr::UNSPECIFIED, Instant::now())
            .unwrap()
            .unwrap();
        assert_eq!(parse(&reply).header.yiaddr, Ipv4Addr::new(192, 168, 1, 3));

        // The stable owner gets its reserved address back.
        let owner = request([0xaa, 0xbb, 0xcc, 0, 0, 0x99], 2, MessageType::Discover);
        let reply = server
            .handle_message(&owner, Ipv4Addr::UNSPECIFIED, Instant::now())
            .unwrap()
            .unwrap();
        assert_eq!(parse(&reply).header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn exhausted_pool_evicts_most_expired() {
        let config = ServerConfig {
            lan_ip: Ipv4Addr::new(192, 168, 1, 1),
            // Tiny /29 pool: hosts .1-.6, server takes .1.
            lan_network: Ipv4Net::new(
                Ipv4Addr::new(192, 168, 1, 0),
                Ipv4Addr::new(255, 255, 255, 248),
            ),
            device: None,
            port: 0,
            domain: "lan".to_string(),
            install_arp_entries: false,
        };
        let mut server = Server::start(config, &EtcSnapshot::default()).unwrap();
        let start = Instant::now();

        for i in 0..5u8 {
            let discover = request([0xaa, 0, 0, 0, 0, i], i as u32, MessageType::Discover);
            assert!(server
                .handle_message(&discover, Ipv4Addr::UNSPECIFIED, start + Duration::from_secs(i as u64))
                .unwrap()
                .is_some());
        }
        assert_eq!(server.leases().len(), 5);

        // Pool is exhausted; a new client far in the future takes over the
        // lease that expired first (the first client's).
        let newcomer = request([0xbb, 0, 0, 0, 0, 1], 99, MessageType::Discover);
        let reply = server
            .handle_message(&newcomer, Ipv4Addr::UNSPECIFIED, start + Duration::from_secs(3600))
            .unwrap()
            .unwrap();
        assert_eq!(parse(&reply).header.yiaddr, Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn expire_drops_dynamic_leases() {
        let mut server = test_server();
        let now = Instant::now();
        let discover = request([0xaa, 0, 0, 0, 0, 1], 1, MessageType::Discover);
        server.handle_message(&discover, Ipv4Addr::UNSPECIFIED, now).unwrap();
        assert_eq!(server.leases().len(), 1);

        server.expire(now + Duration::from_secs(11));
        assert!(server.leases().is_empty());
    }
}
