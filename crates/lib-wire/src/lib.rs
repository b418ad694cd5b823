//! Byte-exact reading and writing of network wire formats.
//!
//! Every protocol handled by this workspace (BOOTP/DHCP, DNS, EAPOL) is
//! big-endian on the wire, so the integer helpers below always use network
//! byte order.

mod error;
mod read;
mod write;

pub use error::BufferError;
pub use read::{ReadBuffer, Readable};
pub use write::{WriteBuffer, Writeable};
