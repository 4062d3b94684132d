// Transition function and dispatch loop of the control channel
use log::{debug, error, info, trace, warn};
use zeroize::Zeroizing;

use crate::core_driver::{ControlState, Step, TransferTarget};
use crate::core_ftpcommand::builder;
use crate::core_network::{send_all, Readiness};
use crate::core_reply::Reply;
use crate::error::{FtpError, Result};
use crate::session::{Event, Operation, SecurityMode, Session, StorePhase};

impl Session {
    /// Applies transitions until the session has to wait for the peer or
    /// the operation ends. `reply` is fed first when given, with a flag
    /// telling whether it came second in one read.
    pub(crate) fn dispatch(&mut self, reply: Option<(&Reply, bool)>) {
        let mut reply = reply;
        loop {
            let step = match reply.take() {
                Some((reply, coalesced)) => self.on_reply(reply, coalesced),
                None => self.on_poll(),
            };

            match step {
                Ok(Step::Wait(next)) => {
                    self.wait(next);
                    return;
                }
                Ok(Step::Immediate(next)) => self.enter(next),
                Ok(Step::Terminal(result)) => {
                    self.complete(result);
                    return;
                }
                Err(e) => self.abort_with(e),
            }
        }
    }

    pub(crate) fn enter(&mut self, next: ControlState) {
        if next == self.state {
            return;
        }
        trace!("{:?} -> {:?}", self.state, next);
        if !next.holds_data_channel() {
            self.close_data_channel();
        }
        self.state = next;
        #[cfg(test)]
        self.trace.push(next);
    }

    /// Enters a waiting state and arms the timer. Moving to a new state
    /// restarts it.
    pub(crate) fn wait(&mut self, next: ControlState) {
        let changed = next != self.state;
        self.enter(next);
        if next.is_idle() {
            return;
        }
        if changed {
            self.timer.restart();
        } else {
            self.timer.start();
        }
    }

    /// Records the failure and heads for `Closing`.
    pub(crate) fn abort_with(&mut self, e: FtpError) {
        if matches!(self.state, ControlState::Closed | ControlState::Closing) {
            return;
        }
        error!("{} failed in {:?}: {}", self.operation.name(), self.state, e);
        self.result = Err(e);
        self.enter(ControlState::Closing);
    }

    /// `abort_with` followed by the closing transitions.
    pub(crate) fn fail(&mut self, e: FtpError) {
        if matches!(self.state, ControlState::Closed | ControlState::Closing) {
            return;
        }
        self.abort_with(e);
        self.dispatch(None);
    }

    pub(crate) fn send_command(&mut self, cmd: &str) -> Result<()> {
        let control = self.control.as_mut().ok_or(FtpError::NotPermitted)?;
        debug!("-> {}", builder::redacted(cmd));
        send_all(control.as_mut(), cmd.as_bytes())?;
        Ok(())
    }

    fn finish(&mut self, result: Result<()>) -> Result<Step> {
        self.enter(ControlState::LoggedIn);
        Ok(Step::Terminal(result))
    }

    fn logged_in(&mut self) -> Result<Step> {
        match self.security {
            SecurityMode::Secure => {
                self.send_command(&builder::pbsz())?;
                Ok(Step::Wait(ControlState::PbszSent))
            }
            SecurityMode::Plain => {
                info!("Logged in to {}:{} as {}", self.server, self.port, self.user);
                self.finish(Ok(()))
            }
        }
    }

    fn send_target(&mut self) -> Result<ControlState> {
        let (cmd, next) = match self.target {
            TransferTarget::Rest => {
                let offset = match &self.operation {
                    Operation::Retrieve(op) => op.offset,
                    _ => 0,
                };
                (builder::rest(offset), ControlState::RestSent)
            }
            TransferTarget::Retr => (builder::retr(&self.remote_path)?, ControlState::RetrSent),
            TransferTarget::Stor => (builder::stor(&self.remote_path)?, ControlState::StorSent),
            TransferTarget::Appe => (builder::appe(&self.remote_path)?, ControlState::AppeSent),
        };
        self.send_command(&cmd)?;
        Ok(next)
    }

    fn on_reply(&mut self, reply: &Reply, coalesced: bool) -> Result<Step> {
        use ControlState::*;

        debug!("<- {} ({:?})", reply, self.state);

        if reply.code == 421 {
            warn!("Server is closing the control connection: {}", reply);
            return Err(FtpError::Closed);
        }

        match (self.state, reply.code) {
            (Connected, 220) => match self.security {
                SecurityMode::Secure => {
                    self.send_command(&builder::auth_tls())?;
                    Ok(Step::Wait(AuthSent))
                }
                SecurityMode::Plain => {
                    self.send_command(&builder::user(&self.user)?)?;
                    Ok(Step::Wait(UserSent))
                }
            },
            (AuthSent, 234) => {
                let control = self.control.as_mut().ok_or(FtpError::NotPermitted)?;
                control.upgrade_to_tls()?;
                self.reader.clear();
                info!("Control channel secured");
                Ok(Step::Immediate(TlsHandshake))
            }
            (UserSent, 331) => {
                let cmd = Zeroizing::new(builder::pass(&self.password)?);
                self.send_command(&cmd)?;
                Ok(Step::Wait(PassSent))
            }
            (UserSent, 230) | (UserSent, 232) | (PassSent, 230) | (PassSent, 202) => {
                self.logged_in()
            }
            (PbszSent, 200) => {
                self.send_command(&builder::prot_private())?;
                Ok(Step::Wait(ProtSent))
            }
            (ProtSent, 200) => {
                info!(
                    "Logged in to {}:{} as {} over TLS",
                    self.server, self.port, self.user
                );
                self.finish(Ok(()))
            }
            (TypeSent, 200) => {
                let extended = self.peer.is_some_and(|addr| addr.is_ipv6());
                let cmd = if extended {
                    builder::epsv()
                } else {
                    builder::pasv()
                };
                self.send_command(&cmd)?;
                Ok(Step::Wait(PasvSent))
            }
            (PasvSent, 227) | (PasvSent, 229) => {
                let (host, port) = self.data_address(reply)?;
                let next = self.send_target()?;
                self.open_data_channel(&host, port)?;
                if next != RestSent {
                    self.activate_data_channel()?;
                }
                self.notify(Event::DataStart, Ok(()));
                Ok(Step::Wait(next))
            }
            (RestSent, 350) => {
                self.send_command(&builder::retr(&self.remote_path)?)?;
                self.activate_data_channel()?;
                Ok(Step::Wait(RetrSent))
            }
            (RetrSent | StorSent | AppeSent, 150 | 125) => Ok(Step::Wait(Transferring)),
            (RetrSent | StorSent | AppeSent, 550) => {
                warn!("{} not found on the server", self.remote_path);
                self.result = Err(FtpError::NotFound);
                Ok(Step::Immediate(TransferDone))
            }
            (Transferring, 226 | 250) => {
                if self.data_eof {
                    Ok(Step::Immediate(TransferDone))
                } else {
                    Ok(Step::Wait(TransferNotified))
                }
            }
            (Transferring, code) if coalesced => {
                if self.strict_replies {
                    error!("Unexpected reply {} after transfer start", code);
                    Err(FtpError::CommError)
                } else {
                    warn!("Unexpected reply {} after transfer start, ignored", code);
                    Ok(Step::Wait(Transferring))
                }
            }
            (SizeSent, 213) => {
                let size = reply.parse_size_213().ok_or(FtpError::Fault)?;
                self.operation = Operation::Size(Some(size));
                self.finish(Ok(()))
            }
            (SizeSent, 550) | (DeleteSent, 550) => self.finish(Err(FtpError::NotFound)),
            (DeleteSent, 250) => {
                info!("Deleted {}", self.remote_path);
                self.finish(Ok(()))
            }
            (QuitSent, _) => Ok(Step::Immediate(Closing)),
            (LoggedIn, code) => {
                debug!("Unsolicited reply {} ignored", code);
                Ok(Step::Wait(LoggedIn))
            }
            (state, code) if reply.is_preliminary() => {
                debug!("Preliminary reply {} in {:?} ignored", code, state);
                Ok(Step::Wait(state))
            }
            (state, code) => {
                warn!("Unexpected reply {} in {:?}: {}", code, state, reply.text);
                Err(FtpError::CommError)
            }
        }
    }

    fn on_poll(&mut self) -> Result<Step> {
        match self.state {
            ControlState::TlsHandshake => {
                self.send_command(&builder::user(&self.user)?)?;
                Ok(Step::Wait(ControlState::UserSent))
            }
            ControlState::TransferDone => {
                self.enter(ControlState::LoggedIn);
                Ok(Step::Terminal(self.result))
            }
            ControlState::Quit => {
                self.send_command(&builder::quit())?;
                Ok(Step::Wait(ControlState::QuitSent))
            }
            ControlState::Closing => {
                self.release();
                self.enter(ControlState::Closed);
                Ok(Step::Terminal(self.result))
            }
            state => Ok(Step::Wait(state)),
        }
    }

    /// Ends the operation in flight. Asynchronous transfers report through
    /// the event callback, every operation leaves its result in `pending`.
    fn complete(&mut self, result: Result<()>) {
        self.timer.stop();
        if let Some(control) = self.control.as_mut() {
            control.set_monitoring(false);
        }

        let notify = match &self.operation {
            Operation::Retrieve(_) => true,
            Operation::Store(op) => op.phase != StorePhase::Negotiating,
            _ => false,
        };
        if self.operation.is_async() {
            self.operation = Operation::None;
        }

        match result {
            Ok(()) => debug!("Operation finished in {:?}", self.state),
            Err(e) => debug!("Operation finished in {:?} with {}", self.state, e),
        }

        if notify {
            let event = match result {
                Ok(()) => Event::DataEnd,
                Err(FtpError::Closed) => Event::Closed,
                Err(FtpError::Timeout) => Event::Timeout,
                Err(_) => Event::Error,
            };
            self.notify(event, result);
        }
        self.pending = Some(result);
    }

    /// Handles readiness of the control socket. Replies from one read are
    /// fed in arrival order.
    pub(crate) fn on_readiness(&mut self, readiness: Readiness) {
        if readiness.readable {
            let Some(control) = self.control.as_mut() else {
                return;
            };

            match self.reader.read(control.as_mut()) {
                Ok(replies) => {
                    for (index, reply) in replies.iter().enumerate() {
                        self.last_response = reply.code;
                        self.dispatch(Some((reply, index > 0)));
                        if self.state == ControlState::Closed {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let e = FtpError::from(e);
                    if e == FtpError::Closed {
                        self.on_control_closed();
                    } else {
                        self.fail(e);
                    }
                    return;
                }
            }
        }

        if readiness.peer_closed {
            self.on_control_closed();
        }
    }

    fn on_control_closed(&mut self) {
        match self.state {
            ControlState::Closed | ControlState::Closing => {}
            ControlState::QuitSent => {
                self.enter(ControlState::Closing);
                self.dispatch(None);
            }
            _ => {
                warn!("Control connection closed by {}", self.server);
                self.fail(FtpError::Closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_network::mock::MockServer;
    use crate::session::SessionOptions;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn logged_in_session(server: &MockServer) -> Session {
        server.reply("USER", "331 Password required");
        server.reply("PASS", "230 Logged in");
        let mut options = SessionOptions::new("ftp.example.com", 21, "bob", "secret");
        options.timeout_secs = 2;
        let mut session = Session::new(options, server.connector()).unwrap();
        session.connect().unwrap();
        session.trace.clear();
        session
    }

    fn record_events(session: &mut Session) -> Rc<RefCell<Vec<(Event, Result<()>)>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        session.set_event_callback(Some(Box::new(move |event, result| {
            sink.borrow_mut().push((event, result));
        })));
        events
    }

    #[test]
    fn test_unexpected_reply_closes_session() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);
        server.reply("DELE", "502 Command not implemented");

        assert_eq!(session.delete("file.txt"), Err(FtpError::CommError));
        assert_eq!(session.state(), ControlState::Closed);
        assert!(server.state().control_closed);
    }

    #[test]
    fn test_service_closing_reply() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);
        server.reply("SIZE", "421 Service not available");

        assert_eq!(session.size("file.txt"), Err(FtpError::Closed));
        assert_eq!(session.state(), ControlState::Closed);
        assert_eq!(session.last_response(), 421);
    }

    #[test]
    fn test_unsolicited_reply_while_idle_is_ignored() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);

        server.push_control("200 Hello again\r\n");
        session.on_readiness(Readiness::readable());
        assert_eq!(session.state(), ControlState::LoggedIn);
        assert!(!session.timer.is_running());
    }

    #[test]
    fn test_lenient_coalesced_reply_is_recorded() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);
        let events = record_events(&mut session);
        server.script_retrieve(b"", "150 Opening\r\n451 Odd\r\n");

        session.retrieve("a.bin", 0, |_: &[u8]| {}).unwrap();
        session.pump_until(|s| s.state() == ControlState::Transferring);

        assert_eq!(session.last_response(), 451);
        assert_eq!(session.state(), ControlState::Transferring);
        assert!(events.borrow().iter().all(|(event, _)| *event == Event::DataStart));
    }

    #[test]
    fn test_strict_coalesced_reply_fails_transfer() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);
        session.strict_replies = true;
        let events = record_events(&mut session);
        server.script_retrieve(b"", "150 Opening\r\n451 Odd\r\n");

        session.retrieve("a.bin", 0, |_: &[u8]| {}).unwrap();
        session.pump_until(|s| !s.is_running());

        assert_eq!(session.state(), ControlState::Closed);
        assert_eq!(
            events.borrow().last(),
            Some(&(Event::Error, Err(FtpError::CommError)))
        );
    }

    #[test]
    fn test_epsv_on_ipv6_peer() {
        let server = MockServer::new();
        server.state().ipv6 = true;
        let mut session = logged_in_session(&server);
        server.reply("TYPE", "200 Type set to I");
        server.reply("EPSV", "229 Entering Extended Passive Mode (|||6446|)");
        server.reply("RETR", "150 Opening\r\n226 Done");
        server.data(b"abc", true);

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        session
            .retrieve("a.bin", 0, move |bytes: &[u8]| {
                sink.borrow_mut().extend_from_slice(bytes)
            })
            .unwrap();
        assert_eq!(session.wait_idle(), Ok(()));

        assert!(server.commands().contains(&"EPSV".to_string()));
        assert_eq!(
            server.state().data_addr,
            Some(("ftp.example.com".to_string(), 6446))
        );
        assert_eq!(received.borrow().as_slice(), b"abc");
    }

    #[test]
    fn test_bad_pasv_reply_is_a_fault() {
        let server = MockServer::new();
        let mut session = logged_in_session(&server);
        let events = record_events(&mut session);
        server.reply("TYPE", "200 Type set to I");
        server.reply("PASV", "227 Passive mode, no address");

        session.retrieve("a.bin", 0, |_: &[u8]| {}).unwrap();
        assert_eq!(session.wait_idle(), Err(FtpError::Fault));
        assert_eq!(*events.borrow(), vec![(Event::Error, Err(FtpError::Fault))]);
        assert_eq!(server.state().data_opened, 0);
    }
}
