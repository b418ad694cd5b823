use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS message is too short: {0} bytes")]
    TooShort(usize),

    #[error("malformed domain name at offset {0}")]
    BadName(usize),

    #[error("failed to load a record from DNS message")]
    BadRecord,

    #[error("DNS message contains {0} questions; only one is supported")]
    BadQuestionCount(u16),

    #[error(transparent)]
    Netcfg(#[from] netcfg::NetcfgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
