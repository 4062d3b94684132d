// Errors of the TLS layer
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to load certificate: {0}")]
    CertificateLoadError(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeError(String),

    #[error("TLS configuration error: {0}")]
    TlsConfigError(String),

    #[error("TLS protocol error: {0}")]
    TlsProtocolError(#[from] rustls::Error),
}
