//! Shared network plumbing: address value types, `/etc` snapshots,
//! interface enumeration and configuration, ARP table injection and UDP
//! socket setup.

mod addr;
mod arp;
mod error;
mod etc;
mod ifs;
mod udp;

pub use addr::{Ipv4Net, MacAddr};
pub use arp::set_arp_entry;
pub use error::NetcfgError;
pub use etc::EtcSnapshot;
pub use ifs::{interfaces, Interface};
pub use udp::bind_udp;
