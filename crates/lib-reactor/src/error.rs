use std::os::fd::RawFd;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("fd {0} is already registered")]
    AlreadyRegistered(RawFd),

    #[error("fd {0} is not registered")]
    NotRegistered(RawFd),

    #[error("epoll_create1: {0}")]
    Create(#[source] std::io::Error),

    #[error("epoll_ctl: {0}")]
    Control(#[source] std::io::Error),

    #[error("epoll_wait: {0}")]
    Wait(#[source] std::io::Error),
}
