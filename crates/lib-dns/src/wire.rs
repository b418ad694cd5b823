//! RFC 1035 wire format: header bit layout, domain-name compression,
//! questions, resource records and whole messages.
//!
//! Compression is accepted on input only; everything this resolver emits
//! is in canonical uncompressed form.

use std::time::{Duration, Instant};

use crate::DnsError;

/// TTL used when answering from a static authoritative entry.
pub const AUTHORITATIVE_TTL: Duration = Duration::from_secs(60);

/// Record types this resolver cares to name; everything else is carried
/// numerically.
pub mod rtype {
    pub const A: u16 = 1;
    pub const NS: u16 = 2;
    pub const CNAME: u16 = 5;
    pub const SOA: u16 = 6;
    pub const PTR: u16 = 12;
    pub const MX: u16 = 15;
    pub const TXT: u16 = 16;
    pub const AAAA: u16 = 28;
    pub const SRV: u16 = 33;
    pub const HTTPS: u16 = 65;
    pub const ANY: u16 = 255;
}

pub mod rclass {
    pub const IN: u16 = 1;
}

pub mod opcode {
    pub const QUERY: u8 = 0;
    pub const IQUERY: u8 = 1;
    pub const STATUS: u8 = 2;
}

pub mod rcode {
    pub const NO_ERROR: u8 = 0;
    pub const NAME_ERROR: u8 = 3;
    pub const NOT_IMPLEMENTED: u8 = 4;
}

pub fn type_name(t: u16) -> &'static str {
    match t {
        rtype::A => "A",
        rtype::NS => "NS",
        rtype::CNAME => "CNAME",
        rtype::SOA => "SOA",
        rtype::PTR => "PTR",
        rtype::MX => "MX",
        rtype::TXT => "TXT",
        rtype::AAAA => "AAAA",
        rtype::SRV => "SRV",
        rtype::HTTPS => "HTTPS",
        rtype::ANY => "ANY",
        _ => "?",
    }
}

/// The 12-byte message header. Flag bits, from the most significant down:
/// QR, Opcode (4), AA, TC, RD, RA, Z (3), RCODE (4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

pub const HEADER_SIZE: usize = 12;

const FLAG_QR: u16 = 1 << 15;
const FLAG_AA: u16 = 1 << 10;
const FLAG_TC: u16 = 1 << 9;
const FLAG_RD: u16 = 1 << 8;
const FLAG_RA: u16 = 1 << 7;

impl Header {
    pub fn parse(buf: &[u8]) -> Result<Header, DnsError> {
        if buf.len() < HEADER_SIZE {
            return Err(DnsError::TooShort(buf.len()));
        }
        let field = |i: usize| u16::from_be_bytes(buf[i..i + 2].try_into().unwrap());
        Ok(Header {
            id: field(0),
            flags: field(2),
            question_count: field(4),
            answer_count: field(6),
            authority_count: field(8),
            additional_count: field(10),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.question_count.to_be_bytes());
        out.extend_from_slice(&self.answer_count.to_be_bytes());
        out.extend_from_slice(&self.authority_count.to_be_bytes());
        out.extend_from_slice(&self.additional_count.to_be_bytes());
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0xf) as u8
    }

    pub fn response_code(&self) -> u8 {
        (self.flags & 0xf) as u8
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    /// Header of a forwarded query: RD set, one question.
    pub fn query(id: u16) -> Header {
        Header {
            id,
            flags: FLAG_RD,
            question_count: 1,
            ..Header::default()
        }
    }

    /// Header of a reply to a client: QR, RD and RA set.
    pub fn reply(id: u16, response_code: u8) -> Header {
        Header {
            id,
            flags: FLAG_QR | FLAG_RD | FLAG_RA | (response_code as u16 & 0xf),
            ..Header::default()
        }
    }

    #[allow(dead_code)]
    pub fn authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }

    #[allow(dead_code)]
    pub fn truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }
}

/// Convert "www.example.com" into "\x03www\x07example\x03com\x00".
/// Empty labels are skipped; \x00 alone encodes the root.
pub fn encode_name(name: &str, out: &mut Vec<u8>) {
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

/// Load a (possibly compressed) domain name starting at `offset`.
///
/// Returns the name, lowercased, and the number of bytes consumed at the
/// original offset. Compression pointers may only jump backwards, which
/// rules out pointer loops; every read is bounds-checked.
pub fn decode_name(message: &[u8], offset: usize) -> Result<(String, usize), DnsError> {
    let start = offset;
    let mut offset = offset;
    let mut name = String::new();
    loop {
        let &len = message.get(offset).ok_or(DnsError::BadName(start))?;
        offset += 1;
        if len == 0 {
            return Ok((name, offset - start));
        }
        if len & 0b1100_0000 == 0b1100_0000 {
            let &low = message.get(offset).ok_or(DnsError::BadName(start))?;
            offset += 1;
            let target = ((len as usize & 0b0011_1111) << 8) | low as usize;
            if target >= start {
                // Forward jumps could loop forever.
                return Err(DnsError::BadName(start));
            }
            let (suffix, _) = decode_name(message, target)?;
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(&suffix);
            return Ok((name, offset - start));
        }
        let label = message
            .get(offset..offset + len as usize)
            .ok_or(DnsError::BadName(start))?;
        if !name.is_empty() {
            name.push('.');
        }
        for &b in label {
            name.push(b.to_ascii_lowercase() as char);
        }
        offset += len as usize;
    }
}

/// The equality key of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn a(name: &str) -> Question {
        Question {
            name: name.to_ascii_lowercase(),
            qtype: rtype::A,
            qclass: rclass::IN,
        }
    }

    pub fn parse(message: &[u8], offset: usize) -> Result<(Question, usize), DnsError> {
        let (name, name_len) = decode_name(message, offset)?;
        let rest = message
            .get(offset + name_len..offset + name_len + 4)
            .ok_or(DnsError::BadRecord)?;
        Ok((
            Question {
                name,
                qtype: u16::from_be_bytes(rest[..2].try_into().unwrap()),
                qclass: u16::from_be_bytes(rest[2..4].try_into().unwrap()),
            },
            name_len + 4,
        ))
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&self.qtype.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, type_name(self.qtype))
    }
}

/// SOA payload, decompressed and re-encoded canonically.
struct Soa {
    primary_name_server: String,
    mailbox: String,
    tail: [u8; 20],
}

impl Soa {
    fn parse(message: &[u8], offset: usize, end: usize) -> Result<(Soa, usize), DnsError> {
        let (primary_name_server, n1) = decode_name(&message[..end], offset)?;
        let (mailbox, n2) = decode_name(&message[..end], offset + n1)?;
        let tail_start = offset + n1 + n2;
        let tail: [u8; 20] = message
            .get(tail_start..tail_start + 20)
            .ok_or(DnsError::BadRecord)?
            .try_into()
            .unwrap();
        Ok((
            Soa { primary_name_server, mailbox, tail },
            n1 + n2 + 20,
        ))
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        encode_name(&self.primary_name_server, out);
        encode_name(&self.mailbox, out);
        out.extend_from_slice(&self.tail);
    }
}

/// One resource record. `expires` is absent for authoritative entries,
/// whose TTL is a fixed [`AUTHORITATIVE_TTL`].
#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub expires: Option<Instant>,
    pub data: Vec<u8>,
}

impl Record {
    /// An authoritative A record.
    pub fn a(name: &str, ip: std::net::Ipv4Addr) -> Record {
        Record {
            name: name.to_ascii_lowercase(),
            rtype: rtype::A,
            rclass: rclass::IN,
            expires: None,
            data: ip.octets().to_vec(),
        }
    }

    pub fn ttl(&self, now: Instant) -> u32 {
        match self.expires {
            Some(expires) => expires.saturating_duration_since(now).as_secs() as u32,
            None => AUTHORITATIVE_TTL.as_secs() as u32,
        }
    }

    pub fn parse(message: &[u8], offset: usize, now: Instant) -> Result<(Record, usize), DnsError> {
        let (question, base_len) = Question::parse(message, offset)?;
        let meta_start = offset + base_len;
        let meta = message
            .get(meta_start..meta_start + 6)
            .ok_or(DnsError::BadRecord)?;
        let ttl = u32::from_be_bytes(meta[..4].try_into().unwrap());
        let data_len = u16::from_be_bytes(meta[4..6].try_into().unwrap()) as usize;
        let data_start = meta_start + 6;
        if message.len() < data_start + data_len {
            return Err(DnsError::BadRecord);
        }
        // Half a second compensates for the time the answer spent in
        // flight.
        let expires = now + Duration::from_secs(ttl as u64) + Duration::from_millis(500);

        // CNAME and SOA payloads may be compressed: re-encode them against
        // the canonical form so cached copies are self-contained.
        let data = match question.qtype {
            rtype::CNAME => {
                let limit = data_start + data_len;
                let (target, consumed) = decode_name(&message[..limit], data_start)?;
                if consumed != data_len {
                    return Err(DnsError::BadRecord);
                }
                let mut data = Vec::new();
                encode_name(&target, &mut data);
                data
            }
            rtype::SOA => {
                let limit = data_start + data_len;
                let (soa, consumed) = Soa::parse(message, data_start, limit)?;
                if consumed != data_len {
                    return Err(DnsError::BadRecord);
                }
                let mut data = Vec::new();
                soa.write_to(&mut data);
                data
            }
            _ => message[data_start..data_start + data_len].to_vec(),
        };

        Ok((
            Record {
                name: question.name,
                rtype: question.qtype,
                rclass: question.qclass,
                expires: Some(expires),
                data,
            },
            base_len + 6 + data_len,
        ))
    }

    pub fn write_to(&self, out: &mut Vec<u8>, now: Instant) {
        encode_name(&self.name, out);
        out.extend_from_slice(&self.rtype.to_be_bytes());
        out.extend_from_slice(&self.rclass.to_be_bytes());
        out.extend_from_slice(&self.ttl(now).to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
    }
}

/// A parsed single-question message.
#[derive(Debug)]
pub struct Message {
    pub header: Header,
    pub question: Question,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl Message {
    pub fn parse(buf: &[u8], now: Instant) -> Result<Message, DnsError> {
        let header = Header::parse(buf)?;
        if header.question_count != 1 {
            return Err(DnsError::BadQuestionCount(header.question_count));
        }
        let mut offset = HEADER_SIZE;
        let (question, question_len) = Question::parse(buf, offset)?;
        offset += question_len;

        let mut section = |count: u16| -> Result<Vec<Record>, DnsError> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (record, len) = Record::parse(buf, offset, now)?;
                offset += len;
                records.push(record);
            }
            Ok(records)
        };
        let answers = section(header.answer_count)?;
        let authority = section(header.authority_count)?;
        let additional = section(header.additional_count)?;

        Ok(Message { header, question, answers, authority, additional })
    }
}
