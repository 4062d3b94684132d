// Public error taxonomy of the FTP client
use std::io::ErrorKind;

use thiserror::Error;

use crate::core_network::error::TransportError;
use crate::core_reply::error::ReplyError;
use crate::core_tls::TlsError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpError {
    #[error("bad parameter")]
    BadParameter,

    #[error("operation not permitted in the current session state")]
    NotPermitted,

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("control connection closed by the server")]
    Closed,

    #[error("communication error")]
    CommError,

    #[error("server address unavailable")]
    Unavailable,

    #[error("remote file not found")]
    NotFound,

    #[error("protocol fault")]
    Fault,

    #[error("no session slot available")]
    NoMemory,
}

pub type Result<T> = std::result::Result<T, FtpError>;

impl From<TransportError> for FtpError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Resolve(_) => FtpError::Unavailable,
            TransportError::Connect(_) => FtpError::CommError,
            TransportError::Timeout => FtpError::Timeout,
            TransportError::Closed => FtpError::Closed,
            TransportError::NotConnected => FtpError::NotPermitted,
            TransportError::Tls(_) => FtpError::CommError,
            TransportError::WouldBlock => FtpError::Fault,
            TransportError::Io(e) => match e.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => FtpError::Closed,
                ErrorKind::TimedOut | ErrorKind::WouldBlock => FtpError::Timeout,
                _ => FtpError::CommError,
            },
        }
    }
}

impl From<ReplyError> for FtpError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionClosed => FtpError::Closed,
            ReplyError::ReadFailed(e) => e.into(),
            ReplyError::InvalidLineFormat
            | ReplyError::InvalidReplyCode(_)
            | ReplyError::BufferFull => FtpError::Fault,
        }
    }
}

impl From<TlsError> for FtpError {
    fn from(_: TlsError) -> Self {
        FtpError::CommError
    }
}
