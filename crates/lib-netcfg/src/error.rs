use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetcfgError {
    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no interface named {0}")]
    NoSuchInterface(String),

    #[error("interface {0} has no IPv4 address")]
    NoAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetcfgError {
    pub(crate) fn syscall(call: &'static str) -> Self {
        NetcfgError::Syscall {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}
