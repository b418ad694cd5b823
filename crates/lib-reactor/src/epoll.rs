use std::collections::HashMap;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::ReactorError;

const MAX_EVENTS: usize = 16;

struct Registration<K> {
    key: K,
    fd: RawFd,
    want_write: bool,
}

/// A readiness event, resolved back to the caller's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<K> {
    pub key: K,
    pub readable: bool,
    pub writable: bool,
}

/// Level-triggered epoll registry.
///
/// Each registration gets a fresh id which is what the kernel hands back in
/// readiness events. Deregistering drops the id, so events already dequeued
/// in the current batch can no longer resolve to the dead listener - a
/// single `epoll_wait` batch never dispatches into a closed fd.
pub struct Reactor<K> {
    epoll: OwnedFd,
    next_id: u64,
    by_id: HashMap<u64, Registration<K>>,
    by_fd: HashMap<RawFd, u64>,
    batch: Vec<libc::epoll_event>,
    batch_pos: usize,
}

impl<K: Clone> Reactor<K> {
    pub fn new() -> Result<Self, ReactorError> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ReactorError::Create(io::Error::last_os_error()));
        }
        Ok(Reactor {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            next_id: 1,
            by_id: HashMap::new(),
            by_fd: HashMap::new(),
            batch: Vec::with_capacity(MAX_EVENTS),
            batch_pos: 0,
        })
    }

    /// Number of live registrations. The event loop terminates at zero.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn interest(want_write: bool) -> u32 {
        let mut events = libc::EPOLLIN as u32;
        if want_write {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, event: Option<&mut libc::epoll_event>) -> Result<(), ReactorError> {
        let ptr = event.map_or(std::ptr::null_mut(), |e| e as *mut _);
        let r = unsafe { libc::epoll_ctl(std::os::fd::AsRawFd::as_raw_fd(&self.epoll), op, fd, ptr) };
        if r < 0 {
            return Err(ReactorError::Control(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Register a file descriptor. The fd stays owned by the caller; at
    /// most one registration per fd is allowed.
    pub fn add(&mut self, key: K, fd: RawFd, want_write: bool) -> Result<(), ReactorError> {
        if self.by_fd.contains_key(&fd) {
            return Err(ReactorError::AlreadyRegistered(fd));
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut event = libc::epoll_event {
            events: Self::interest(want_write),
            u64: id,
        };
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(&mut event))?;
        self.by_id.insert(id, Registration { key, fd, want_write });
        self.by_fd.insert(fd, id);
        Ok(())
    }

    /// Toggle EPOLLOUT interest for a registered fd.
    pub fn set_want_write(&mut self, fd: RawFd, want_write: bool) -> Result<(), ReactorError> {
        let id = *self.by_fd.get(&fd).ok_or(ReactorError::NotRegistered(fd))?;
        let reg = self.by_id.get_mut(&id).expect("id indexed by fd");
        if reg.want_write == want_write {
            return Ok(());
        }
        reg.want_write = want_write;
        let mut event = libc::epoll_event {
            events: Self::interest(want_write),
            u64: id,
        };
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(&mut event))
    }

    /// Deregister a file descriptor and invalidate any of its readiness
    /// events still queued in the current batch.
    pub fn del(&mut self, fd: RawFd) -> Result<(), ReactorError> {
        let id = self.by_fd.remove(&fd).ok_or(ReactorError::NotRegistered(fd))?;
        self.by_id.remove(&id);
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    /// One `epoll_wait`. Fills the internal batch; drain it with
    /// [`Reactor::next_event`]. EINTR leaves the batch empty.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<(), ReactorError> {
        self.batch.clear();
        self.batch_pos = 0;
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        let n = unsafe {
            libc::epoll_wait(
                std::os::fd::AsRawFd::as_raw_fd(&self.epoll),
                events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(());
            }
            return Err(ReactorError::Wait(err));
        }
        self.batch.extend_from_slice(&events[..n as usize]);
        Ok(())
    }

    /// Next event of the current batch, skipping entries whose listener was
    /// deregistered after the batch was dequeued.
    pub fn next_event(&mut self) -> Option<Event<K>> {
        while self.batch_pos < self.batch.len() {
            let raw = self.batch[self.batch_pos];
            self.batch_pos += 1;
            let id = raw.u64;
            if let Some(reg) = self.by_id.get(&id) {
                let readable = raw.events & libc::EPOLLIN as u32 != 0;
                let writable = reg.want_write && raw.events & libc::EPOLLOUT as u32 != 0;
                if !readable && !writable {
                    continue;
                }
                return Some(Event {
                    key: reg.key.clone(),
                    readable,
                    writable,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    use nix::unistd::{pipe, write};

    #[test]
    fn readable_pipe_produces_event() {
        let mut reactor: Reactor<u32> = Reactor::new().unwrap();
        let (rx, tx) = pipe().unwrap();
        reactor.add(7, rx.as_raw_fd(), false).unwrap();
        write(&tx, b"x").unwrap();

        reactor.poll(Some(Duration::from_secs(1))).unwrap();
        let ev = reactor.next_event().unwrap();
        assert_eq!(ev.key, 7);
        assert!(ev.readable);
        assert!(reactor.next_event().is_none());
    }

    #[test]
    fn one_registration_per_fd() {
        let mut reactor: Reactor<u32> = Reactor::new().unwrap();
        let (rx, _tx) = pipe().unwrap();
        reactor.add(1, rx.as_raw_fd(), false).unwrap();
        assert!(matches!(
            reactor.add(2, rx.as_raw_fd(), false),
            Err(ReactorError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn del_invalidates_dequeued_events() {
        let mut reactor: Reactor<u32> = Reactor::new().unwrap();
        let (rx1, tx1) = pipe().unwrap();
        let (rx2, tx2) = pipe().unwrap();
        reactor.add(1, rx1.as_raw_fd(), false).unwrap();
        reactor.add(2, rx2.as_raw_fd(), false).unwrap();
        write(&tx1, b"x").unwrap();
        write(&tx2, b"x").unwrap();

        reactor.poll(Some(Duration::from_secs(1))).unwrap();
        let first = reactor.next_event().unwrap();
        // Whichever listener fires first deregisters the other one; the
        // other one's already-dequeued event must not be delivered.
        let other_fd = if first.key == 1 { rx2.as_raw_fd() } else { rx1.as_raw_fd() };
        reactor.del(other_fd).unwrap();
        assert!(reactor.next_event().is_none());
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn want_write_gates_writable_events() {
        let mut reactor: Reactor<u32> = Reactor::new().unwrap();
        let (_rx, tx) = pipe().unwrap();

        // An empty pipe is writable, but without the want-write bit no
        // event is delivered.
        reactor.add(1, tx.as_raw_fd(), false).unwrap();
        reactor.poll(Some(Duration::from_millis(10))).unwrap();
        assert!(reactor.next_event().is_none());

        reactor.set_want_write(tx.as_raw_fd(), true).unwrap();
        reactor.poll(Some(Duration::from_secs(1))).unwrap();
        let ev = reactor.next_event().unwrap();
        assert!(ev.writable);
        assert!(!ev.readable);
    }

    #[test]
    fn timeout_returns_empty_batch() {
        let mut reactor: Reactor<u32> = Reactor::new().unwrap();
        let (rx, _tx) = pipe().unwrap();
        reactor.add(1, rx.as_raw_fd(), false).unwrap();
        reactor.poll(Some(Duration::from_millis(1))).unwrap();
        assert!(reactor.next_event().is_none());
    }
}
