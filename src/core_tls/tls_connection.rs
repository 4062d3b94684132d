// TLS client stream over a connected TCP socket
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};

use crate::core_network::tcp::{wait_readable, SocketState};
use crate::core_network::{Readiness, TransportError};
use crate::core_tls::error::TlsError;

pub struct TlsConnection {
    conn: ClientConnection,
    sock: TcpStream,
}

impl TlsConnection {
    /// Sends the ClientHello and returns without waiting for the server.
    /// The handshake goes on in `poll`, or blocks on the first read or write.
    pub fn start(
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
        sock: TcpStream,
    ) -> Result<Self, TlsError> {
        let conn = ClientConnection::new(config, name)?;
        let mut tls = Self { conn, sock };
        tls.flush()
            .map_err(|e| TlsError::TlsHandshakeError(e.to_string()))?;
        Ok(tls)
    }

    /// Runs the whole client handshake on `sock`, blocking up to the socket
    /// timeouts.
    pub fn handshake(
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
        sock: TcpStream,
    ) -> Result<Self, TlsError> {
        let mut tls = Self::start(config, name, sock)?;
        tls.finish_handshake()
            .map_err(|e| TlsError::TlsHandshakeError(e.to_string()))?;
        Ok(tls)
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn finish_handshake(&mut self) -> io::Result<()> {
        if !self.is_handshaking() {
            return Ok(());
        }
        while self.is_handshaking() {
            self.conn.complete_io(&mut self.sock)?;
        }
        debug!(
            "TLS established, {:?} {:?}",
            self.conn.protocol_version(),
            self.conn.negotiated_cipher_suite().map(|suite| suite.suite())
        );
        Ok(())
    }

    pub fn socket(&self) -> &TcpStream {
        &self.sock
    }

    /// Waits for decrypted bytes. Raw bytes that only complete part of a
    /// record, or handshake messages, are absorbed and the wait goes on
    /// until `wait` runs out.
    pub fn poll(&mut self, wait: Duration, io_timeout: Duration) -> Result<Readiness, TransportError> {
        let deadline = Instant::now() + wait;
        let handshaking = self.is_handshaking();

        loop {
            let state = self.conn.process_new_packets().map_err(TlsError::from)?;
            self.flush()?;
            if handshaking && !self.is_handshaking() {
                debug!("TLS established, {:?}", self.conn.protocol_version());
            }

            if state.plaintext_bytes_to_read() > 0 {
                return Ok(Readiness::readable());
            }
            if state.peer_has_closed() {
                return Ok(Readiness {
                    readable: true,
                    peer_closed: true,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match wait_readable(&self.sock, remaining, io_timeout)? {
                SocketState::Idle => return Ok(Readiness::default()),
                SocketState::Eof => return Ok(Readiness::peer_closed()),
                SocketState::Readable => {
                    if self.conn.read_tls(&mut self.sock)? == 0 {
                        return Ok(Readiness::peer_closed());
                    }
                }
            }
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.finish_handshake()?;
        self.conn.reader().read(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.finish_handshake()?;
        let n = self.conn.writer().write(data)?;
        self.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        Ok(())
    }

    /// Sends close_notify and shuts the socket down.
    pub fn close(&mut self) -> io::Result<()> {
        self.conn.send_close_notify();
        let flushed = self.flush();
        self.sock.shutdown(Shutdown::Both)?;
        flushed
    }
}
