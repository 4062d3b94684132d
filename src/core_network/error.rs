// Transport level errors
use std::io;

use thiserror::Error;

use crate::core_tls::TlsError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to resolve {0}")]
    Resolve(String),

    #[error("connect failed: {0}")]
    Connect(io::Error),

    #[error("operation would block")]
    WouldBlock,

    #[error("timed out")]
    Timeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("socket is not connected")]
    NotConnected,

    #[error("tls error: {0}")]
    Tls(#[from] TlsError),

    #[error("io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => TransportError::WouldBlock,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e),
        }
    }
}
