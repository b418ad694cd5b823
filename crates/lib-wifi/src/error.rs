use thiserror::Error;

#[derive(Debug, Error)]
pub enum WifiError {
    #[error("nl80211: {0}")]
    Nl80211(#[from] nl80211::Nl80211Error),

    #[error(transparent)]
    Netcfg(#[from] netcfg::NetcfgError),

    #[error("message too small for EAPOL-Key")]
    FrameTooShort,

    #[error("invalid EAPOL-Key frame: {0}")]
    InvalidFrame(&'static str),

    #[error("unexpected key information {got:#06x}, wanted {expected:#06x}")]
    UnexpectedKeyInformation { got: u16, expected: u16 },

    #[error("invalid MIC. This is usually caused by a wrong Wi-Fi password")]
    InvalidMic,

    #[error("EAPOL frame from unknown station {0}")]
    UnknownStation(netcfg::MacAddr),

    #[error("another EAPOL listener is running in this process")]
    ListenerConflict,

    #[error("{call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WifiError {
    pub(crate) fn syscall(call: &'static str) -> Self {
        WifiError::Syscall {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}
