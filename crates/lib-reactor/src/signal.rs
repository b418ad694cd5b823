use std::os::fd::{AsRawFd, RawFd};

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use crate::ReactorError;

/// Routes process signals through the event loop.
///
/// The listed signals are blocked for the whole process and delivered over
/// a signalfd instead, so shutdown is just another readiness event.
pub struct SignalListener {
    fd: SignalFd,
}

impl SignalListener {
    pub fn new(signals: &[Signal]) -> Result<Self, ReactorError> {
        let mut mask = SigSet::empty();
        for signal in signals {
            mask.add(*signal);
        }
        mask.thread_block()
            .map_err(|e| ReactorError::Create(e.into()))?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(|e| ReactorError::Create(e.into()))?;
        Ok(SignalListener { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Next pending signal, if any.
    pub fn take_signal(&mut self) -> Option<Signal> {
        match self.fd.read_signal() {
            Ok(Some(siginfo)) => Signal::try_from(siginfo.ssi_signo as i32).ok(),
            _ => None,
        }
    }
}
