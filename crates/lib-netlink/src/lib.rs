//! Netlink IPC with the Linux kernel.
//!
//! This crate wraps the raw packet-oriented netlink socket and provides the
//! send/receive plumbing shared by the routing, netfilter and generic
//! netlink users. Users of this crate should be intimately familiar with
//! the netlink protocol; see
//! <https://docs.kernel.org/userspace-api/netlink/intro.html>.

pub mod consts;

mod builder;
mod error;
mod genetlink;
mod rtnetlink;
mod transport;

pub use builder::{MsgBuilder, MsgRef};
pub use error::NetlinkError;
pub use genetlink::{GenlFamily, GenlOp, MulticastGroup};
pub use rtnetlink::{routes, Route};
pub use transport::{AttrSet, MsgHeader, NestedIter, NetlinkSocket};
