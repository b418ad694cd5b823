use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhcpError {
    #[error("malformed DHCP message: {0}")]
    Malformed(#[from] wire::BufferError),

    #[error("no IP available")]
    NoIpAvailable,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(
        "failed to set the client IP/MAC association in the system ARP \
         table: {0}. This may happen when the server is under a denial of \
         service attack; unplug LAN devices one by one until the error \
         stops coming up"
    )]
    ArpFailed(#[source] netcfg::NetcfgError),

    #[error(transparent)]
    Netcfg(#[from] netcfg::NetcfgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
