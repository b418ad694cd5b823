//! Strongly typed nl80211 bindings for the access-point control path:
//! wiphy/interface/regulatory enumeration, channel selection and the write
//! operations used to run an AP.
//!
//! Reference: Linux kernel include/uapi/linux/nl80211.h.

pub mod consts;

mod channels;
mod error;
mod ops;
mod parse;
mod types;

pub use channels::pick_channel;
pub use error::Nl80211Error;
pub use ops::{DisconnectReason, Nl80211};
pub use types::{
    Band, Bitrate, Channel, Frequency, HtCapabilities, InterfaceInfo, RegRule, Regulation,
    VhtCapabilities, Wiphy,
};
