//! WPA2-Personal access point: nl80211-driven AP bring-up, raw EAPOL
//! socket and the per-station 4-way handshake.
//!
//! Key frames follow IEEE 802.11-2016 section 12.7 with Key Descriptor
//! Version 2 (HMAC-SHA1 MIC, AES key wrap).

mod ap;
mod crypto;
mod eapol;
mod elements;
mod error;
mod handshake;
mod procscan;

pub use ap::{AccessPoint, WifiConfig, WifiService};
pub use crypto::{derive_pmk, derive_ptk, key_wrap};
pub use eapol::{EapolKeyFrame, ETH_P_PAE};
pub use error::WifiError;
pub use handshake::{Handshake, HandshakeAction, HandshakeState};
pub use procscan::kill_conflicting_eapol_listeners;
