//! Netfilter control and the userspace NAT.
//!
//! The firewall intercepts all traffic between LAN and WAN with two
//! nftables rules that enqueue packets to nfqueue 1337, then performs NAT
//! translation in userspace, replacing the kernel conntrack system. The
//! installed rules can be inspected with `nft list table gatekeeper` and
//! are cleaned up on shutdown.

pub mod consts;

mod error;
mod firewall;
mod nat;
mod nftables;
mod nfqueue;
mod packet;

pub use error::NftError;
pub use firewall::{Firewall, FirewallConfig};
pub use nat::{NatTable, Proto};
pub use nftables::{queue_rule, Nftables, NftablesHook, RuleMatch};
pub use nfqueue::{NfqueueSocket, QueuedPacket, QUEUE_NUMBER};
pub use packet::{translate, Translation};
