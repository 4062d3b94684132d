// Public operations on a session
use std::io::{self, Read};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::constants::{DATA_BUFFER_SIZE, POLL_SLICE_MS};
use crate::core_driver::{ControlState, TransferTarget};
use crate::core_ftpcommand::builder;
use crate::core_network::{SocketKind, Transport};
use crate::error::{FtpError, Result};
use crate::session::{Operation, RetrieveOp, SecurityMode, Session, StoreOp, StorePhase};

fn poll_slice() -> Duration {
    Duration::from_millis(POLL_SLICE_MS)
}

impl Session {
    /// Opens a plain control connection and logs in.
    pub fn connect(&mut self) -> Result<()> {
        self.open(SecurityMode::Plain, None)
    }

    /// Opens the control connection, upgrades it with AUTH TLS and logs in.
    /// Data channels are protected too. `certificate` (PEM or DER) is
    /// trusted in addition to the ones given before.
    pub fn connect_secure(&mut self, certificate: Option<&[u8]>) -> Result<()> {
        self.open(SecurityMode::Secure, certificate)
    }

    fn open(&mut self, security: SecurityMode, certificate: Option<&[u8]>) -> Result<()> {
        match self.state {
            ControlState::LoggedIn if self.security == security => return Ok(()),
            ControlState::Closed => {}
            _ => return Err(FtpError::NotPermitted),
        }
        if let Some(certificate) = certificate {
            if certificate.is_empty() {
                return Err(FtpError::BadParameter);
            }
            if !self.certificates.iter().any(|known| known == certificate) {
                self.certificates.push(certificate.to_vec());
            }
        }

        self.security = security;
        self.begin(Operation::Connect);

        let control = match self.open_control() {
            Ok(control) => control,
            Err(e) => {
                error!("Connection to {}:{} failed: {}", self.server, self.port, e);
                self.operation = Operation::None;
                return Err(e);
            }
        };
        self.peer = control.peer_addr();
        self.control = Some(control);
        self.reader.clear();
        self.last_response = 0;
        self.wait(ControlState::Connected);

        let result = self.run_blocking(|_| false);
        self.operation = Operation::None;
        result
    }

    fn open_control(&self) -> Result<Box<dyn Transport>> {
        let mut control = self
            .connector
            .create(&self.server, self.port, SocketKind::Plain)?;
        control.set_timeout(self.timeout);
        for certificate in &self.certificates {
            control.add_certificate(certificate)?;
        }
        control.connect()?;
        control.set_monitoring(true);
        Ok(control)
    }

    /// Logs out with QUIT when idle, otherwise closes both sockets at once.
    /// A transfer cut short this way gets no event.
    pub fn disconnect(&mut self) -> Result<()> {
        let idle = matches!(self.operation, Operation::None);
        match self.state {
            ControlState::Closed => Ok(()),
            ControlState::LoggedIn if idle => {
                self.begin(Operation::Disconnect);
                self.enter(ControlState::Quit);
                let result = self.run_blocking(|_| false);
                self.operation = Operation::None;
                info!("Logged out from {}:{}", self.server, self.port);
                result
            }
            _ => {
                self.force_close();
                Ok(())
            }
        }
    }

    /// Closes everything without talking to the server or notifying.
    pub(crate) fn force_close(&mut self) {
        if self.state != ControlState::Closed {
            warn!(
                "Closing {}:{} during {} in {:?}",
                self.server,
                self.port,
                self.operation.name(),
                self.state
            );
        }
        self.operation = Operation::None;
        self.release();
        self.enter(ControlState::Closed);
        self.result = Ok(());
        self.pending = None;
    }

    /// Starts a download. Returns once the first command is sent; bytes go to
    /// `sink` and the outcome comes as a `DataEnd` or error event.
    /// A non-zero `offset` resumes the file with REST.
    pub fn retrieve<F>(&mut self, path: &str, offset: u64, sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.ensure_idle()?;
        builder::retr(path)?;

        self.remote_path = path.to_string();
        self.target = if offset > 0 {
            TransferTarget::Rest
        } else {
            TransferTarget::Retr
        };
        self.begin(Operation::Retrieve(RetrieveOp {
            offset,
            sink: Box::new(sink),
        }));
        self.start(&builder::type_binary(), ControlState::TypeSent)?;
        info!("Retrieving {} from offset {}", path, offset);
        Ok(())
    }

    /// Negotiates an upload up to the open data channel. The content is then
    /// given to `send`.
    pub fn store(&mut self, path: &str, append: bool) -> Result<()> {
        self.ensure_idle()?;
        builder::stor(path)?;

        self.remote_path = path.to_string();
        self.target = if append {
            TransferTarget::Appe
        } else {
            TransferTarget::Stor
        };
        self.begin(Operation::Store(StoreOp {
            phase: StorePhase::Negotiating,
        }));
        self.start(&builder::type_binary(), ControlState::TypeSent)?;

        if let Err(e) = self.run_blocking(|s| s.data.is_some()) {
            self.operation = Operation::None;
            return Err(e);
        }
        match &mut self.operation {
            Operation::Store(op) => {
                op.phase = StorePhase::Streaming;
                info!("Storing {}", path);
                Ok(())
            }
            _ => Err(FtpError::Fault),
        }
    }

    /// Uploads `data` on the data channel of a `store`. With `done` the data
    /// channel is closed and the call waits for the server to confirm.
    ///
    /// # Returns
    ///
    /// The number of bytes written.
    pub fn send(&mut self, data: &[u8], done: bool) -> Result<usize> {
        match &self.operation {
            Operation::Store(op) if op.phase == StorePhase::Streaming => {}
            _ => return Err(FtpError::BadParameter),
        }

        let written = if data.is_empty() {
            0
        } else {
            match self.write_data(data) {
                Ok(written) => written,
                Err(e) => {
                    self.fail(e);
                    return Err(e);
                }
            }
        };

        if done {
            if let Operation::Store(op) = &mut self.operation {
                op.phase = StorePhase::Finished;
            }
            self.close_data_channel();
            self.data_eof = true;
            self.run_blocking(|s| !matches!(s.operation, Operation::Store(_)))?;
        }

        Ok(written)
    }

    /// Uploads everything `reader` yields.
    ///
    /// # Returns
    ///
    /// The number of bytes uploaded.
    pub fn upload<R: Read>(&mut self, path: &str, append: bool, mut reader: R) -> Result<u64> {
        self.store(path, append)?;

        let mut buffer = vec![0u8; DATA_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Reading upload source failed: {}", e);
                    self.force_close();
                    return Err(FtpError::Fault);
                }
            };
            if n == 0 {
                self.send(&[], true)?;
                return Ok(total);
            }
            total += self.send(&buffer[..n], false)? as u64;
        }
    }

    /// Size of a remote file in bytes.
    pub fn size(&mut self, path: &str) -> Result<u64> {
        self.ensure_idle()?;
        let cmd = builder::size(path)?;

        self.remote_path = path.to_string();
        self.begin(Operation::Size(None));
        self.start(&cmd, ControlState::SizeSent)?;

        let result = self.run_blocking(|_| false);
        let size = match std::mem::replace(&mut self.operation, Operation::None) {
            Operation::Size(size) => size,
            _ => None,
        };
        result?;
        size.ok_or(FtpError::Fault)
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        self.ensure_idle()?;
        let cmd = builder::dele(path)?;

        self.remote_path = path.to_string();
        self.begin(Operation::Delete);
        self.start(&cmd, ControlState::DeleteSent)?;

        let result = self.run_blocking(|_| false);
        self.operation = Operation::None;
        result
    }

    /// One event loop turn: checks the timer, then the data socket, then the
    /// control socket for up to `wait`.
    ///
    /// # Returns
    ///
    /// Whether a transfer is still running.
    pub fn process_events(&mut self, wait: Duration) -> bool {
        self.check_timer();

        let data_monitored = self.data.as_ref().is_some_and(|data| data.is_monitoring());
        if data_monitored {
            if let Some(data) = self.data.as_mut() {
                match data.transport.poll(Duration::ZERO) {
                    Ok(readiness) if !readiness.is_idle() => self.on_data_readiness(readiness),
                    Ok(_) => {}
                    Err(e) => self.on_data_error(e),
                }
            }
        }

        let control_monitored = self
            .control
            .as_ref()
            .is_some_and(|control| control.is_monitoring());
        if control_monitored {
            let mut wait = if data_monitored {
                wait.min(poll_slice())
            } else {
                wait
            };
            if let Some(remaining) = self.timer.remaining() {
                wait = wait.min(remaining);
            }
            if let Some(control) = self.control.as_mut() {
                match control.poll(wait) {
                    Ok(readiness) if !readiness.is_idle() => self.on_readiness(readiness),
                    Ok(_) => {}
                    Err(e) => self.fail(e.into()),
                }
            }
        }

        self.is_running()
    }

    /// Runs the event loop until no transfer is running.
    ///
    /// # Returns
    ///
    /// The result of the last operation.
    pub fn wait_idle(&mut self) -> Result<()> {
        while self.process_events(poll_slice()) {}
        self.pending.take().unwrap_or(Ok(()))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != ControlState::LoggedIn || !matches!(self.operation, Operation::None) {
            return Err(FtpError::NotPermitted);
        }
        Ok(())
    }

    fn begin(&mut self, operation: Operation) {
        debug!("Starting {}", operation.name());
        self.operation = operation;
        self.result = Ok(());
        self.pending = None;
        self.data_eof = false;
    }

    /// Sends the first command of an operation. A failure is returned to
    /// the caller only, the session is closed without an event.
    fn start(&mut self, cmd: &str, next: ControlState) -> Result<()> {
        if let Err(e) = self.send_command(cmd) {
            self.operation = Operation::None;
            self.fail(e);
            self.pending = None;
            return Err(e);
        }
        if let Some(control) = self.control.as_mut() {
            control.set_monitoring(true);
        }
        self.wait(next);
        Ok(())
    }

    /// Handles an expired timer. Returns whether it fired.
    fn check_timer(&mut self) -> bool {
        if !self.timer.poll_expired(Instant::now()) {
            return false;
        }
        error!(
            "Timed out after {:?} in {:?} waiting for {}",
            self.timer.interval(),
            self.state,
            self.server
        );
        self.fail(FtpError::Timeout);
        true
    }

    /// Polls the control socket inline until the operation ends or `done`
    /// holds.
    pub(crate) fn run_blocking<F>(&mut self, done: F) -> Result<()>
    where
        F: Fn(&Session) -> bool,
    {
        self.pending = None;
        self.dispatch(None);

        loop {
            if let Some(result) = self.pending.take() {
                return result;
            }
            if done(self) {
                return Ok(());
            }
            if self.check_timer() {
                continue;
            }

            let wait = self.timer.remaining().unwrap_or_else(poll_slice);
            let Some(control) = self.control.as_mut() else {
                return Err(self.result.err().unwrap_or(FtpError::Fault));
            };
            match control.poll(wait) {
                Ok(readiness) if !readiness.is_idle() => self.on_readiness(readiness),
                Ok(_) => {}
                Err(e) => self.fail(e.into()),
            }
        }
    }

    /// Drives the event loop until `done` holds or nothing is running.
    #[cfg(test)]
    pub(crate) fn pump_until<F: Fn(&Session) -> bool>(&mut self, done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) && Instant::now() < deadline {
            if !self.process_events(Duration::from_millis(5)) && !done(self) {
                break;
            }
        }
    }
}
