use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use crate::ReactorError;

/// A periodic timerfd, used for the systemd watchdog ping.
pub struct TimerListener {
    fd: TimerFd,
}

impl TimerListener {
    pub fn interval(period: Duration) -> Result<Self, ReactorError> {
        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .map_err(|e| ReactorError::Create(e.into()))?;
        fd.set(
            Expiration::Interval(TimeSpec::from_duration(period)),
            TimerSetTimeFlags::empty(),
        )
        .map_err(|e| ReactorError::Create(e.into()))?;
        Ok(TimerListener { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_fd().as_raw_fd()
    }

    /// Consume the expiration counter so the fd stops polling readable.
    pub fn drain(&self) {
        let mut ticks = [0u8; 8];
        unsafe {
            libc::read(self.fd(), ticks.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}
