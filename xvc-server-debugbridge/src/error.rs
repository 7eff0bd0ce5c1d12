//! Error taxonomy for the back-end bridge: syscall failures, protocol
//! violations and retryable driver timeouts.
use std::{error::Error, fmt::Display, io};

/// Errors produced while driving a back-end driver or its memory-mapped
/// register window.
#[derive(Debug)]
pub enum BridgeError {
    /// A syscall (open, mmap, read, write, accept, ...) failed. Not
    /// retried by the stream layer.
    Sys(io::Error),
    /// The peer or the firmware violated the stream/XVC framing
    /// contract (bad version, unexpected command, length overflow).
    /// Always drops the session.
    Proto(String),
    /// The firmware did not complete a chunk within the retry budget.
    /// Retried internally by the stream layer; only surfaces once
    /// exhausted.
    Timeout,
}

impl From<io::Error> for BridgeError {
    fn from(value: io::Error) -> Self {
        BridgeError::Sys(value)
    }
}

impl From<nix::Error> for BridgeError {
    fn from(value: nix::Error) -> Self {
        BridgeError::Sys(io::Error::from_raw_os_error(value as i32))
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Sys(err) => write!(f, "{}", err),
            BridgeError::Proto(msg) => write!(f, "protocol error: {}", msg),
            BridgeError::Timeout => write!(f, "driver timed out"),
        }
    }
}

impl Error for BridgeError {}
