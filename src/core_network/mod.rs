// Transport collaborator used by the control and data channels
pub mod error;
pub mod pasv;
pub mod tcp;
pub mod timer;

#[cfg(test)]
pub(crate) mod mock;

use std::net::SocketAddr;
use std::time::Duration;

pub use error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Plain TCP. `upgrade_to_tls` runs the whole handshake in place.
    Plain,
    /// Protected data socket. `connect` opens TCP only, `upgrade_to_tls`
    /// sends the ClientHello and the handshake ends while the socket is
    /// polled or on its first read or write.
    Secure,
}

/// Readiness reported by a monitored socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub peer_closed: bool,
}

impl Readiness {
    pub fn readable() -> Self {
        Self {
            readable: true,
            peer_closed: false,
        }
    }

    pub fn peer_closed() -> Self {
        Self {
            readable: false,
            peer_closed: true,
        }
    }

    /// Nothing the session has to react to.
    pub fn is_idle(&self) -> bool {
        !self.readable && !self.peer_closed
    }
}

/// One socket handle. The session owns its handles exclusively, dropping a
/// handle deletes it.
pub trait Transport {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Writes as much of `data` as the socket accepts and returns the count.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// `Ok(0)` means the peer closed its side.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn set_timeout(&mut self, timeout: Duration);

    fn add_certificate(&mut self, certificate: &[u8]) -> Result<(), TransportError>;

    /// Name checked against the server certificate, defaults to the host.
    fn set_tls_name(&mut self, _name: &str) {}

    fn set_monitoring(&mut self, enabled: bool);

    fn is_monitoring(&self) -> bool;

    /// Waits up to `timeout` for the socket to become readable or closed.
    fn poll(&mut self, timeout: Duration) -> Result<Readiness, TransportError>;

    fn upgrade_to_tls(&mut self) -> Result<(), TransportError>;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Creates socket handles. Creating a handle never performs I/O.
pub trait Connector {
    fn create(
        &self,
        host: &str,
        port: u16,
        kind: SocketKind,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Sends the whole buffer, retrying short writes.
pub fn send_all(transport: &mut dyn Transport, mut data: &[u8]) -> Result<(), TransportError> {
    while !data.is_empty() {
        match transport.send(data) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => data = &data[n..],
            Err(TransportError::WouldBlock) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
