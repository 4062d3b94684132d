// Passive mode data channel: open, stream, tear down
use log::{debug, error, info, trace};

use crate::constants::DATA_BUFFER_SIZE;
use crate::core_driver::ControlState;
use crate::core_network::{send_all, Readiness, SocketKind, Transport, TransportError};
use crate::core_reply::Reply;
use crate::error::{FtpError, Result};
use crate::session::{Operation, SecurityMode, Session};

/// The per-transfer data socket.
pub struct DataChannel {
    pub(crate) transport: Box<dyn Transport>,
    buffer: Vec<u8>,
}

impl DataChannel {
    pub fn is_monitoring(&self) -> bool {
        self.transport.is_monitoring()
    }
}

impl Session {
    /// Where to connect the data channel. A PASV reply carries its own
    /// address, an EPSV reply only a port on the control host.
    pub(crate) fn data_address(&self, reply: &Reply) -> Result<(String, u16)> {
        let address = match reply.code {
            227 => reply
                .parse_pasv_227()
                .map(|addr| (addr.ip().to_string(), addr.port())),
            229 => reply
                .parse_epsv_229()
                .map(|port| (self.server.clone(), port)),
            _ => None,
        };

        address.ok_or_else(|| {
            error!("Unparsable passive reply: {}", reply);
            FtpError::Fault
        })
    }

    pub(crate) fn open_data_channel(&mut self, host: &str, port: u16) -> Result<()> {
        let kind = match self.security {
            SecurityMode::Plain => SocketKind::Plain,
            SecurityMode::Secure => SocketKind::Secure,
        };

        let mut transport = self.connector.create(host, port, kind)?;
        transport.set_timeout(self.timeout);
        if self.security == SecurityMode::Secure {
            // The certificate belongs to the control host, not the data address
            transport.set_tls_name(&self.server);
            for certificate in &self.certificates {
                transport.add_certificate(certificate)?;
            }
        }
        transport.connect()?;

        info!("Data channel open to {}:{}", host, port);
        self.data = Some(DataChannel {
            transport,
            buffer: vec![0u8; DATA_BUFFER_SIZE],
        });
        self.data_eof = false;
        Ok(())
    }

    /// Called once RETR, STOR or APPE is on the wire. Servers only take the
    /// data channel TLS handshake after that command.
    pub(crate) fn activate_data_channel(&mut self) -> Result<()> {
        let download = matches!(self.operation, Operation::Retrieve(_));
        let Some(channel) = self.data.as_mut() else {
            return Err(FtpError::Fault);
        };
        if self.security == SecurityMode::Secure {
            channel.transport.upgrade_to_tls()?;
            debug!("Data channel TLS started");
        }

        // Downloads are driven by readiness, uploads by `send`
        channel.transport.set_monitoring(download);
        Ok(())
    }

    pub(crate) fn close_data_channel(&mut self) {
        if let Some(mut channel) = self.data.take() {
            channel.transport.set_monitoring(false);
            if let Err(e) = channel.transport.disconnect() {
                debug!("Data channel close failed: {}", e);
            }
            debug!("Data channel closed");
        }
    }

    /// Handles readiness of a monitored data socket. One read per call.
    pub(crate) fn on_data_readiness(&mut self, readiness: Readiness) {
        let Some(channel) = self.data.as_mut() else {
            return;
        };

        if readiness.readable {
            match channel.transport.read(&mut channel.buffer) {
                Ok(0) | Err(TransportError::Closed) => self.on_data_eof(),
                Ok(n) => {
                    trace!("Received {} bytes on the data channel", n);
                    self.timer.restart();
                    if let Operation::Retrieve(op) = &mut self.operation {
                        (op.sink)(&channel.buffer[..n]);
                    }
                }
                Err(TransportError::WouldBlock) => {}
                Err(e) => self.on_data_error(e),
            }
        } else if readiness.peer_closed {
            self.on_data_eof();
        }
    }

    pub(crate) fn on_data_error(&mut self, e: TransportError) {
        error!("Data channel failed: {}", e);
        self.close_data_channel();
        self.fail(e.into());
    }

    /// Records the end of the data stream. When the server already reported
    /// completion this finishes the transfer.
    pub(crate) fn on_data_eof(&mut self) {
        if let Some(channel) = self.data.as_mut() {
            channel.transport.set_monitoring(false);
        }
        if self.data_eof {
            return;
        }
        self.data_eof = true;
        debug!("Data channel reached end of stream in {:?}", self.state);

        if self.state == ControlState::TransferNotified {
            self.close_data_channel();
            self.enter(ControlState::TransferDone);
            self.dispatch(None);
        }
    }

    /// Writes upload bytes, all of them or an error.
    pub(crate) fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        let channel = self.data.as_mut().ok_or(FtpError::NotPermitted)?;
        send_all(channel.transport.as_mut(), data)?;
        self.timer.restart();
        Ok(data.len())
    }
}
