// Blocking TCP transport with optional TLS, polled by timed peeks
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rustls::client::ClientSessionStore;

use crate::constants::DEFAULT_TIMEOUT_SECS;
use crate::core_network::{Connector, Readiness, SocketKind, Transport, TransportError};
use crate::core_tls::tls_config::server_name;
use crate::core_tls::{TlsConfig, TlsConnection};

pub(crate) enum SocketState {
    Idle,
    Readable,
    Eof,
}

/// Waits up to `wait` for bytes on `sock` without consuming them.
/// The read timeout is put back to `io_timeout` afterwards.
pub(crate) fn wait_readable(
    sock: &TcpStream,
    wait: Duration,
    io_timeout: Duration,
) -> io::Result<SocketState> {
    let mut peeked = [0u8; 1];

    let peeked = if wait.is_zero() {
        sock.set_nonblocking(true)?;
        let peeked = sock.peek(&mut peeked);
        sock.set_nonblocking(false)?;
        peeked
    } else {
        sock.set_read_timeout(Some(wait))?;
        let peeked = sock.peek(&mut peeked);
        sock.set_read_timeout(Some(io_timeout).filter(|t| !t.is_zero()))?;
        peeked
    };

    match peeked {
        Ok(0) => Ok(SocketState::Eof),
        Ok(_) => Ok(SocketState::Readable),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Ok(SocketState::Idle)
        }
        Err(e) => Err(e),
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsConnection>),
}

pub struct TcpTransport {
    host: String,
    port: u16,
    kind: SocketKind,
    tls_name: String,
    timeout: Duration,
    monitoring: bool,
    tls: TlsConfig,
    stream: Option<Stream>,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16, kind: SocketKind, tls: TlsConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            kind,
            tls_name: host.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            monitoring: false,
            tls,
            stream: None,
        }
    }

    /// Control sockets wait for the whole handshake, data sockets only send
    /// the ClientHello and finish while polled.
    fn secure(&self, sock: TcpStream) -> Result<TlsConnection, TransportError> {
        let config = self.tls.build()?;
        let name = server_name(&self.tls_name)?;
        debug!("Starting TLS handshake with {} as {}", self.host, self.tls_name);
        let tls = match self.kind {
            SocketKind::Plain => TlsConnection::handshake(config, name, sock)?,
            SocketKind::Secure => TlsConnection::start(config, name, sock)?,
        };
        Ok(tls)
    }

    /// A secure socket used before `upgrade_to_tls` starts TLS on the spot.
    fn ensure_tls(&mut self) -> Result<(), TransportError> {
        if self.kind == SocketKind::Secure && matches!(self.stream, Some(Stream::Plain(_))) {
            self.upgrade_to_tls()?;
        }
        Ok(())
    }

    fn open_socket(&self) -> Result<TcpStream, TransportError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(self.host.clone()))?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve(self.host.clone()));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(sock) => {
                    sock.set_read_timeout(Some(self.timeout))?;
                    sock.set_write_timeout(Some(self.timeout))?;
                    sock.set_nodelay(true)?;
                    info!("Connected to {}", addr);
                    return Ok(sock);
                }
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::Connect(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no address to connect to")
        })))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let sock = self.open_socket()?;
        self.stream = Some(Stream::Plain(sock));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.monitoring = false;
        match self.stream.take() {
            Some(Stream::Plain(sock)) => {
                // The peer may already be gone
                let _ = sock.shutdown(Shutdown::Both);
                Ok(())
            }
            Some(Stream::Tls(mut tls)) => {
                if let Err(e) = tls.close() {
                    debug!("TLS close on {}:{} failed: {}", self.host, self.port, e);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_tls()?;
        match self.stream.as_mut() {
            Some(Stream::Plain(sock)) => Ok(sock.write(data)?),
            Some(Stream::Tls(tls)) => Ok(tls.write(data)?),
            None => Err(TransportError::NotConnected),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.ensure_tls()?;
        match self.stream.as_mut() {
            Some(Stream::Plain(sock)) => Ok(sock.read(buf)?),
            Some(Stream::Tls(tls)) => Ok(tls.read(buf)?),
            None => Err(TransportError::NotConnected),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            warn!("Ignoring zero socket timeout for {}:{}", self.host, self.port);
            return;
        }
        self.timeout = timeout;
    }

    fn add_certificate(&mut self, certificate: &[u8]) -> Result<(), TransportError> {
        let count = self.tls.add_certificate(certificate)?;
        debug!("Added {} trusted certificate(s) for {}", count, self.host);
        Ok(())
    }

    fn set_tls_name(&mut self, name: &str) {
        self.tls_name = name.to_string();
    }

    fn set_monitoring(&mut self, enabled: bool) {
        self.monitoring = enabled;
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, TransportError> {
        self.ensure_tls()?;
        match self.stream.as_mut() {
            Some(Stream::Plain(sock)) => match wait_readable(sock, timeout, self.timeout)? {
                SocketState::Idle => Ok(Readiness::default()),
                SocketState::Readable => Ok(Readiness::readable()),
                SocketState::Eof => Ok(Readiness::peer_closed()),
            },
            Some(Stream::Tls(tls)) => tls.poll(timeout, self.timeout),
            None => Err(TransportError::NotConnected),
        }
    }

    fn upgrade_to_tls(&mut self) -> Result<(), TransportError> {
        match self.stream.take() {
            Some(Stream::Plain(sock)) => {
                let tls = self.secure(sock)?;
                self.stream = Some(Stream::Tls(Box::new(tls)));
                Ok(())
            }
            Some(stream @ Stream::Tls(_)) => {
                self.stream = Some(stream);
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        match self.stream.as_ref()? {
            Stream::Plain(sock) => sock.peer_addr().ok(),
            Stream::Tls(tls) => tls.socket().peer_addr().ok(),
        }
    }
}

/// Creates `TcpTransport` handles. Every handle of one connector shares the
/// TLS session cache.
pub struct TcpConnector {
    session_store: Arc<dyn ClientSessionStore>,
    insecure_skip_verify: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self {
            session_store: TlsConfig::new_session_store(),
            insecure_skip_verify: false,
        }
    }

    pub fn insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }
}

impl Connector for TcpConnector {
    fn create(
        &self,
        host: &str,
        port: u16,
        kind: SocketKind,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut tls = TlsConfig::new(Arc::clone(&self.session_store));
        tls.set_insecure_skip_verify(self.insecure_skip_verify);
        Ok(Box::new(TcpTransport::new(host, port, kind, tls)))
    }
}
