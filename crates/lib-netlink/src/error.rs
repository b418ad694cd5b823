use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("{call} failed: {source}")]
    Io {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel rejected netlink request: {}{}", std::io::Error::from_raw_os_error(*errno), match message { Some(m) => format!(" ({m})"), None => String::new() })]
    Kernel {
        errno: i32,
        message: Option<String>,
        offset: Option<u32>,
    },

    #[error("netlink message truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("attribute type {atype} is out of range (max {max})")]
    AttrOutOfRange { atype: u16, max: u16 },

    #[error("attribute length {len} is too small")]
    AttrTooShort { len: u16 },

    #[error("{count} extra bytes at the end of netlink buffer")]
    TrailingBytes { count: usize },

    #[error("unexpected netlink message type 0x{mtype:04x}")]
    UnexpectedMessage { mtype: u16 },

    #[error("generic netlink family \"{0}\" not found")]
    NoSuchFamily(String),

    #[error("generic netlink multicast group \"{0}\" not found")]
    NoSuchGroup(String),
}

impl NetlinkError {
    pub(crate) fn io(call: &'static str) -> Self {
        NetlinkError::Io {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}
