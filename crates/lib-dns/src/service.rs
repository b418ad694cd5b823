use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use netcfg::{bind_udp, EtcSnapshot, Ipv4Net};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::cache::{Cache, EntryState, IncomingRequest};
use crate::table::TableRow;
use crate::wire::{opcode, rcode, Header, Message, Question, Record, HEADER_SIZE};
use crate::DnsError;

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub lan_ip: Ipv4Addr,
    pub lan_network: Ipv4Net,
    /// Interface the LAN-facing socket is pinned to.
    pub device: Option<String>,
    /// LAN-facing server port (53).
    pub server_port: u16,
    /// Privileged source port for upstream queries (338).
    pub client_port: u16,
    /// Port upstream resolvers answer from (53).
    pub upstream_port: u16,
    /// Upstream resolvers from `/etc/resolv.conf`, queried round robin.
    pub resolv: Vec<Ipv4Addr>,
    /// Local domain this server is authoritative for.
    pub domain: String,
}

/// The DNS proxy: the LAN-facing server socket, the upstream-facing client
/// socket and the shared cache.
pub struct DnsService {
    config: DnsConfig,
    server_socket: UdpSocket,
    client_socket: UdpSocket,
    cache: Cache,
    static_entries: HashMap<Question, Vec<Record>>,
    next_request_id: u16,
    next_upstream: usize,
}

impl DnsService {
    pub fn start(config: DnsConfig, etc: &EtcSnapshot) -> Result<Self, DnsError> {
        let server_socket = bind_udp(config.server_port, config.device.as_deref(), false)?;
        let client_socket = bind_udp(config.client_port, None, true)?;

        let mut service = DnsService {
            server_socket,
            client_socket,
            cache: Cache::new(),
            static_entries: HashMap::new(),
            next_request_id: rand::thread_rng().gen(),
            next_upstream: 0,
            config,
        };

        for (ip, aliases) in &etc.hosts {
            if ip.octets()[0] == 127 {
                continue;
            }
            for alias in aliases {
                service.insert_authoritative(alias, *ip);
            }
        }
        let hostname = etc.hostname.clone();
        let lan_ip = service.config.lan_ip;
        service.insert_authoritative(&hostname, lan_ip);

        Ok(service)
    }

    fn insert_authoritative(&mut self, host: &str, ip: Ipv4Addr) {
        let name = format!("{}.{}", host, self.config.domain);
        let question = Question::a(&name);
        let record = Record::a(&name, ip);
        self.static_entries.insert(question, vec![record]);
    }

    pub fn server_fd(&self) -> RawFd {
        self.server_socket.as_raw_fd()
    }

    pub fn client_fd(&self) -> RawFd {
        self.client_socket.as_raw_fd()
    }

    pub fn expire(&mut self, now: Instant) {
        self.cache.expire(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.cache.next_deadline()
    }

    /// Expiration-ordered snapshot of the dynamic cache.
    pub fn table(&self) -> Vec<TableRow> {
        self.cache
            .iter_by_expiration()
            .map(|(expires, question)| TableRow {
                question: question.clone(),
                expires,
            })
            .collect()
    }

    /// Drain the LAN-facing socket.
    pub fn on_server_readable(&mut self) {
        self.expire(Instant::now());
        let mut buf = [0u8; 2048];
        loop {
            let (len, src) = match self.server_socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(%err, "DNS server recv_from failed");
                    break;
                }
            };
            let std::net::SocketAddr::V4(src) = src else { continue };
            self.handle_query(&buf[..len], src);
        }
    }

    /// Drain the upstream-facing socket.
    pub fn on_client_readable(&mut self) {
        self.expire(Instant::now());
        let mut buf = [0u8; 2048];
        loop {
            let (len, src) = match self.client_socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(%err, "DNS client recv_from failed");
                    break;
                }
            };
            let std::net::SocketAddr::V4(src) = src else { continue };
            self.handle_upstream_reply(&buf[..len], src);
        }
    }

    fn handle_query(&mut self, buf: &[u8], src: SocketAddrV4) {
        if !self.config.lan_network.contains(*src.ip()) {
            info!(source = %src, "DNS query from outside the LAN");
            return;
        }
        let header = match Header::parse(buf) {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, "undecodable DNS query");
                return;
            }
        };
        if header.is_reply() {
            return;
        }
        if header.opcode() != opcode::QUERY || header.question_count != 1 {
            self.send_not_implemented(buf, header, src);
            return;
        }
        let now = Instant::now();
        let message = match Message::parse(buf, now) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "undecodable DNS query");
                return;
            }
        };
        let question = message.question;
        debug!(id = header.id, %question, source = %src, "query");

        let local_suffix = format!(".{}", self.config.domain);
        if question.name.ends_with(&local_suffix) {
            match self.static_entries.get(&question) {
                Some(answers) => {
                    let reply =
                        build_reply(header.id, &question, rcode::NO_ERROR, answers, &[], &[], now);
                    self.send_to_client(&reply, src);
                }
                None => {
                    let reply =
                        build_reply(header.id, &question, rcode::NAME_ERROR, &[], &[], &[], now);
                    self.send_to_client(&reply, src);
                }
            }
            return;
        }

        let request = IncomingRequest { id: header.id, client: src };
        match self.cache.get(&question).map(|entry| &entry.state) {
            Some(EntryState::Ready { .. }) => {
                debug!(%question, "answering from cache");
                self.answer_from_cache(&question, request, now);
            }
            Some(EntryState::Pending { .. }) => {
                self.cache.add_waiter(&question, request, now);
            }
            None => {
                let outgoing_id = self.allocate_request_id();
                self.cache
                    .insert_pending(question.clone(), outgoing_id, request, now);
                self.forward(&question, outgoing_id);
            }
        }
    }

    fn answer_from_cache(&mut self, question: &Question, request: IncomingRequest, now: Instant) {
        let Some(entry) = self.cache.get(question) else {
            return;
        };
        if let EntryState::Ready { response_code, answers, authority, additional } = &entry.state {
            let reply = build_reply(
                request.id,
                question,
                *response_code,
                answers,
                authority,
                additional,
                now,
            );
            self.send_to_client(&reply, request.client);
        }
    }

    fn allocate_request_id(&mut self) -> u16 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }

    /// Send a single-question query upstream, rotating over the resolvers.
    fn forward(&mut self, question: &Question, outgoing_id: u16) {
        let mut packet = Vec::with_capacity(64);
        Header::query(outgoing_id).write_to(&mut packet);
        question.write_to(&mut packet);

        let upstream = self.config.resolv[self.next_upstream % self.config.resolv.len()];
        self.next_upstream = (self.next_upstream + 1) % self.config.resolv.len();
        let dest = SocketAddrV4::new(upstream, self.config.upstream_port);
        if let Err(err) = self.client_socket.send_to(&packet, dest) {
            error!(%err, %upstream, "couldn't forward DNS query");
        } else {
            debug!(%question, %upstream, "forwarding");
        }
    }

    fn handle_upstream_reply(&mut self, buf: &[u8], src: SocketAddrV4) {
        if !self.config.resolv.contains(src.ip()) {
            info!(source = %src, "DNS reply from an unexpected server");
            return;
        }
        if src.port() != self.config.upstream_port {
            info!(source = %src, "DNS reply from an unexpected source port");
            return;
        }
        let now = Instant::now();
        let message = match Message::parse(buf, now) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "undecodable upstream DNS reply");
                return;
            }
        };
        if message.header.opcode() != opcode::QUERY || !message.header.is_reply() {
            return;
        }
        let question = message.question.clone();
        let Some((waiting, entry)) = self.cache.resolve(message, now) else {
            debug!(%question, "unexpected or expired upstream reply");
            return;
        };
        let EntryState::Ready { response_code, answers, authority, additional } = &entry.state
        else {
            return;
        };
        let replies: Vec<(Vec<u8>, SocketAddrV4)> = waiting
            .into_iter()
            .map(|request| {
                (
                    build_reply(
                        request.id,
                        &question,
                        *response_code,
                        answers,
                        authority,
                        additional,
                        now,
                    ),
                    request.client,
                )
            })
            .collect();
        for (reply, client) in replies {
            self.send_to_client(&reply, client);
        }
    }

    fn send_to_client(&self, reply: &[u8], client: SocketAddrV4) {
        if let Err(err) = self.server_socket.send_to(reply, client) {
            error!(%err, %client, "couldn't send DNS reply");
        }
    }

    fn send_not_implemented(&self, buf: &[u8], request: Header, src: SocketAddrV4) {
        let mut reply = Vec::with_capacity(HEADER_SIZE + 32);
        let mut header = Header::reply(request.id, rcode::NOT_IMPLEMENTED);
        // Mirror the question when there is exactly one and it parses.
        let question = if request.question_count == 1 {
            Question::parse(buf, HEADER_SIZE).ok().map(|(q, _)| q)
        } else {
            None
        };
        if question.is_some() {
            header.question_count = 1;
        }
        header.write_to(&mut reply);
        if let Some(question) = question {
            question.write_to(&mut reply);
        }
        self.send_to_client(&reply, src);
    }
}

fn build_reply(
    id: u16,
    question: &Question,
    response_code: u8,
    answers: &[Record],
    authority: &[Record],
    additional: &[Record],
    now: Instant,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    let mut header = Header::reply(id, response_code);
    header.question_count = 1;
    header.answer_count = answers.len() as u16;
    header.authority_count = authority.len() as u16;
    header.additional_count = additional.len() as u16;
    header.write_to(&mut out);
    question.write_to(&mut out);
    for record in answers.iter().chain(authority).chain(additional) {
        record.write_to(&mut out, now);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::rtype;
    use std::time::Duration;

    /// A service talking to loopback sockets: `lan` plays a LAN client,
    /// `upstream` plays the resolv.conf server.
    struct Harness {
        service: DnsService,
        lan: UdpSocket,
        upstream: UdpSocket,
        server_addr: SocketAddrV4,
    }

    fn harness(etc: &EtcSnapshot) -> Harness {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let upstream_port = upstream.local_addr().unwrap().port();
        let config = DnsConfig {
            lan_ip: Ipv4Addr::new(127, 0, 0, 1),
            lan_network: Ipv4Net::new(
                Ipv4Addr::new(127, 0, 0, 0),
                Ipv4Addr::new(255, 0, 0, 0),
            ),
            device: None,
            server_port: 0,
            client_port: 0,
            upstream_port,
            resolv: vec![Ipv4Addr::new(127, 0, 0, 1)],
            domain: "lan".to_string(),
        };
        let service = DnsService::start(config, etc).unwrap();
        let lan = UdpSocket::bind("127.0.0.1:0").unwrap();
        lan.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        upstream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Local addr of a socket bound to 0.0.0.0 reports 0.0.0.0; reach
        // it over loopback.
        let server_port = local_port(&service.server_socket);
        Harness {
            service,
            lan,
            upstream,
            server_addr: SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), server_port),
        }
    }

    fn local_port(socket: &UdpSocket) -> u16 {
        socket.local_addr().unwrap().port()
    }

    fn query(id: u16, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        Header::query(id).write_to(&mut out);
        Question::a(name).write_to(&mut out);
        out
    }

    fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddrV4) {
        let mut buf = [0u8; 2048];
        let (len, src) = socket.recv_from(&mut buf).unwrap();
        let std::net::SocketAddr::V4(src) = src else { panic!() };
        (buf[..len].to_vec(), src)
    }

    #[test]
    fn forward_and_cache_hit() {
        let mut h = harness(&EtcSnapshot::default());

        // First query goes upstream with a fresh id.
        h.lan.send_to(&query(0x0001, "example.com"), h.server_addr).unwrap();
        h.service.on_server_readable();
        let (forwarded, client_addr) = recv(&h.upstream);
        let forwarded_header = Header::parse(&forwarded).unwrap();
        assert!(!forwarded_header.is_reply());
        assert!(forwarded_header.recursion_desired());
        assert_ne!(forwarded_header.id, 0x0001);

        // Upstream answers 93.184.216.34, TTL 60.
        let now = Instant::now();
        let answer = build_reply(
            forwarded_header.id,
            &Question::a("example.com"),
            rcode::NO_ERROR,
            &[Record {
                name: "example.com".to_string(),
                rtype: rtype::A,
                rclass: 1,
                expires: Some(now + Duration::from_secs(60)),
                data: vec![93, 184, 216, 34],
            }],
            &[],
            &[],
            now,
        );
        h.upstream.send_to(&answer, client_addr).unwrap();
        h.service.on_client_readable();

        // The waiting client got its reply with its own id.
        let (reply, _) = recv(&h.lan);
        let reply_header = Header::parse(&reply).unwrap();
        assert_eq!(reply_header.id, 0x0001);
        assert!(reply_header.is_reply());
        assert_eq!(reply_header.answer_count, 1);
        assert!(reply.windows(4).any(|w| w == [93, 184, 216, 34]));

        // A second identical query is served from cache, no upstream
        // traffic.
        h.lan.send_to(&query(0x0002, "example.com"), h.server_addr).unwrap();
        h.service.on_server_readable();
        let (reply, _) = recv(&h.lan);
        let reply_header = Header::parse(&reply).unwrap();
        assert_eq!(reply_header.id, 0x0002);
        assert_eq!(reply_header.answer_count, 1);
        let mut probe = [0u8; 1];
        assert!(h.upstream.recv_from(&mut probe).is_err());
    }

    #[test]
    fn coalesced_queries_share_one_upstream_request() {
        let mut h = harness(&EtcSnapshot::default());
        let second_client = UdpSocket::bind("127.0.0.1:0").unwrap();
        second_client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        h.lan.send_to(&query(0x0a, "coalesce.test"), h.server_addr).unwrap();
        second_client
            .send_to(&query(0x0b, "coalesce.test"), h.server_addr)
            .unwrap();
        h.service.on_server_readable();

        // Only one forwarded query.
        let (forwarded, client_addr) = recv(&h.upstream);
        let mut probe = [0u8; 1];
        assert!(h.upstream.recv_from(&mut probe).is_err());

        let now = Instant::now();
        let answer = build_reply(
            Header::parse(&forwarded).unwrap().id,
            &Question::a("coalesce.test"),
            rcode::NO_ERROR,
            &[Record {
                name: "coalesce.test".to_string(),
                rtype: rtype::A,
                rclass: 1,
                expires: Some(now + Duration::from_secs(30)),
                data: vec![10, 0, 0, 1],
            }],
            &[],
            &[],
            now,
        );
        h.upstream.send_to(&answer, client_addr).unwrap();
        h.service.on_client_readable();

        // Both waiters answered, each with its own id.
        let (first, _) = recv(&h.lan);
        let (second, _) = recv(&second_client);
        assert_eq!(Header::parse(&first).unwrap().id, 0x0a);
        assert_eq!(Header::parse(&second).unwrap().id, 0x0b);
    }

    #[test]
    fn local_domain_is_authoritative() {
        let mut etc = EtcSnapshot::default();
        etc.parse_hosts("192.168.1.10 printer\n127.0.0.1 me\n");
        etc.hostname = "gateway".to_string();
        let mut h = harness(&etc);

        h.lan.send_to(&query(0x21, "printer.lan"), h.server_addr).unwrap();
        h.service.on_server_readable();
        let (reply, _) = recv(&h.lan);
        let header = Header::parse(&reply).unwrap();
        assert_eq!(header.response_code(), rcode::NO_ERROR);
        assert_eq!(header.answer_count, 1);
        assert!(reply.windows(4).any(|w| w == [192, 168, 1, 10]));

        // 127/8 hosts entries are not injected.
        h.lan.send_to(&query(0x22, "me.lan"), h.server_addr).unwrap();
        // The machine hostname resolves to the LAN IP.
        h.lan.send_to(&query(0x23, "gateway.lan"), h.server_addr).unwrap();
        // Unknown local names are NAME_ERROR without upstream traffic.
        h.lan.send_to(&query(0x24, "missing.lan"), h.server_addr).unwrap();
        h.service.on_server_readable();

        let (reply, _) = recv(&h.lan);
        assert_eq!(Header::parse(&reply).unwrap().response_code(), rcode::NAME_ERROR);
        let (reply, _) = recv(&h.lan);
        let header = Header::parse(&reply).unwrap();
        assert_eq!(header.response_code(), rcode::NO_ERROR);
        let (reply, _) = recv(&h.lan);
        assert_eq!(Header::parse(&reply).unwrap().response_code(), rcode::NAME_ERROR);

        let mut probe = [0u8; 1];
        assert!(h.upstream.recv_from(&mut probe).is_err());
    }

    #[test]
    fn unsupported_opcodes_get_not_implemented() {
        let mut h = harness(&EtcSnapshot::default());
        let mut packet = query(0x31, "example.com");
        packet[2] = opcode::IQUERY << 3;
        h.lan.send_to(&packet, h.server_addr).unwrap();
        h.service.on_server_readable();
        let (reply, _) = recv(&h.lan);
        let header = Header::parse(&reply).unwrap();
        assert_eq!(header.id, 0x31);
        assert_eq!(header.response_code(), rcode::NOT_IMPLEMENTED);
    }

    #[test]
    fn replies_from_unknown_sources_are_dropped() {
        let mut h = harness(&EtcSnapshot::default());
        h.lan.send_to(&query(0x41, "drop.test"), h.server_addr).unwrap();
        h.service.on_server_readable();
        let (forwarded, client_addr) = recv(&h.upstream);

        // Reply arrives from the right IP but a wrong source port: the
        // service ignores it and the client starves.
        let rogue = UdpSocket::bind("127.0.0.1:0").unwrap();
        let now = Instant::now();
        let answer = build_reply(
            Header::parse(&forwarded).unwrap().id,
            &Question::a("drop.test"),
            rcode::NO_ERROR,
            &[],
            &[],
            &[],
            now,
        );
        rogue.send_to(&answer, client_addr).unwrap();
        h.service.on_client_readable();
        let mut probe = [0u8; 1];
        assert!(h.lan.recv_from(&mut probe).is_err());
    }

    #[test]
    fn table_snapshot_is_expiration_ordered() {
        let mut h = harness(&EtcSnapshot::default());
        h.lan.send_to(&query(1, "a.test"), h.server_addr).unwrap();
        h.lan.send_to(&query(2, "b.test"), h.server_addr).unwrap();
        h.service.on_server_readable();
        let table = h.service.table();
        assert_eq!(table.len(), 2);
        assert!(table[0].expires <= table[1].expires);
    }
}
