//! Error types for the interception toolkit.

use thiserror::Error;

/// Result type alias for evpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing, muxing, replaying or supervising.
#[derive(Debug, Error)]
pub enum Error {
    /// A syscall, read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Exclusive access to a device was denied.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// A record crossing a component boundary had the wrong size.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A non-blocking send found the queue full.
    #[error("queue full: {0}")]
    Backpressure(String),

    /// A rule or device description could not be interpreted.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A job process could not be forked or executed.
    #[error("failed to spawn job: {0}")]
    Spawn(String),
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(std::io::Error::from(errno))
    }
}
