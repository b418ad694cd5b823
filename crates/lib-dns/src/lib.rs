//! Caching, forwarding DNS proxy with static authoritative entries for the
//! local domain.
//!
//! ### See
//!
//! RFC 1035 - Domain Names - Implementation and Specification:
//! https://datatracker.ietf.org/doc/html/rfc1035

pub mod wire;

mod cache;
mod error;
mod service;
mod table;

pub use cache::{Entry, EntryState, IncomingRequest};
pub use error::DnsError;
pub use service::{DnsConfig, DnsService};
pub use table::TableRow;
