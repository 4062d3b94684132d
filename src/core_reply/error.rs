// Reply decoding errors
use thiserror::Error;

use crate::core_network::TransportError;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("read failed: {0}")]
    ReadFailed(TransportError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid line format")]
    InvalidLineFormat,
    #[error("invalid reply code {0}")]
    InvalidReplyCode(u16),
    #[error("reply buffer full without a complete reply")]
    BufferFull,
}
