// Client side TLS for explicit FTPS (AUTH TLS) and protected data channels

pub mod error;
pub mod tls_config;
pub mod tls_connection;

#[cfg(test)]
pub(crate) mod test_server;

pub use error::TlsError;
pub use tls_config::TlsConfig;
pub use tls_connection::TlsConnection;
