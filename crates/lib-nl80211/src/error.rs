use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nl80211Error {
    #[error("netlink: {0}")]
    Netlink(#[from] netlink::NetlinkError),

    #[error("no wiphy available")]
    NoWiphy,

    #[error("wireless interface {0} not found")]
    NoSuchInterface(u32),

    #[error("no {0} band on this radio")]
    NoBand(&'static str),

    #[error("no usable channel under the current regulatory domain")]
    NoChannel,
}
