//! DHCP wire types and the LAN-facing lease server.
//!
//! ### See
//!
//! RFC 2131 - Dynamic Host Configuration Protocol:
//! https://datatracker.ietf.org/doc/html/rfc2131
//!
//! RFC 2132 - DHCP Options and BOOTP Vendor Extensions:
//! https://datatracker.ietf.org/doc/html/rfc2132

pub mod types;

mod constants;
mod error;
mod server;

pub use constants::*;
pub use error::DhcpError;
pub use server::{Lease, Reply, Server, ServerConfig};
