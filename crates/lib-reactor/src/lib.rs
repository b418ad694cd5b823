//! Single-threaded, level-triggered I/O multiplexing.
//!
//! The whole daemon runs on one [`Reactor`]: every UDP socket, netlink
//! connection, packet socket, signalfd and timerfd is registered here and
//! dispatched from one `epoll_wait` loop. Cache entries that age out are
//! tracked in per-subsystem [`ExpireQueue`]s sharing the loop's monotonic
//! clock.

mod epoll;
mod error;
mod expire;
mod signal;
mod timer;

pub use epoll::{Event, Reactor};
pub use error::ReactorError;
pub use expire::ExpireQueue;
pub use signal::SignalListener;
pub use timer::TimerListener;
