// Scripted server side of the control and data sockets, for tests
use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::core_network::{Connector, Readiness, SocketKind, Transport, TransportError};

/// Sockets created for this port play the control channel, any other port
/// is a data channel.
pub(crate) const CONTROL_PORT: u16 = 21;

pub(crate) struct MockState {
    pub greeting: String,
    /// (verb, reply) pairs, each used once, first match wins.
    script: Vec<(String, String)>,
    /// Verb after which the server drops the control connection.
    close_on: Option<String>,
    /// Reply sent once the data stream is over, seen by either side.
    after_data: Option<String>,

    pub control_rx: VecDeque<u8>,
    pub peer_closed: bool,
    pub commands: Vec<String>,
    /// Commands interleaved with "<data connect>" and "<data tls>".
    pub timeline: Vec<String>,
    pub connects: usize,
    pub upgraded: bool,
    pub certificates: usize,
    pub control_closed: bool,
    pub fail_resolve: bool,
    pub fail_connect: bool,
    pub ipv6: bool,

    pub data_rx: VecDeque<u8>,
    pub data_eof: bool,
    pub data_sent: Vec<u8>,
    pub data_opened: usize,
    pub data_closed: bool,
    pub data_secured: bool,
    /// Reads on the data socket fail.
    pub data_fail: bool,
    pub data_addr: Option<(String, u16)>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            greeting: "220 Service ready\r\n".to_string(),
            script: Vec::new(),
            close_on: None,
            after_data: None,
            control_rx: VecDeque::new(),
            peer_closed: false,
            commands: Vec::new(),
            timeline: Vec::new(),
            connects: 0,
            upgraded: false,
            certificates: 0,
            control_closed: false,
            fail_resolve: false,
            fail_connect: false,
            ipv6: false,
            data_rx: VecDeque::new(),
            data_eof: false,
            data_sent: Vec::new(),
            data_opened: 0,
            data_closed: false,
            data_secured: false,
            data_fail: false,
            data_addr: None,
        }
    }
}

impl MockState {
    fn data_finished(&mut self) {
        if let Some(reply) = self.after_data.take() {
            self.control_rx.extend(reply.bytes());
        }
    }

    fn on_command(&mut self, line: &str) {
        self.commands.push(line.to_string());
        self.timeline.push(line.to_string());
        let verb = line.split(' ').next().unwrap_or_default();

        if self.close_on.as_deref() == Some(verb) {
            self.peer_closed = true;
            return;
        }
        if let Some(pos) = self.script.iter().position(|(v, _)| v == verb) {
            let (_, reply) = self.script.remove(pos);
            self.control_rx.extend(reply.bytes());
        }
    }
}

pub(crate) struct MockServer {
    state: Rc<RefCell<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }

    pub fn connector(&self) -> Rc<dyn Connector> {
        Rc::new(MockConnector {
            state: Rc::clone(&self.state),
        })
    }

    pub fn state(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// Answers the next `verb` command with `reply` (line ending added).
    pub fn reply(&self, verb: &str, reply: &str) {
        self.state()
            .script
            .push((verb.to_string(), format!("{}\r\n", reply)));
    }

    pub fn reply_after_data(&self, reply: &str) {
        self.state().after_data = Some(format!("{}\r\n", reply));
    }

    pub fn close_on(&self, verb: &str) {
        self.state().close_on = Some(verb.to_string());
    }

    pub fn push_control(&self, text: &str) {
        self.state().control_rx.extend(text.bytes());
    }

    pub fn data(&self, bytes: &[u8], eof: bool) {
        let mut state = self.state();
        state.data_rx.extend(bytes.iter().copied());
        state.data_eof = eof;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn timeline(&self) -> Vec<String> {
        self.state().timeline.clone()
    }

    /// TYPE, PASV to 127.0.0.1:1025 and RETR, with `data` then end of stream
    /// on the data channel. An empty `retr_reply` leaves RETR unanswered.
    pub fn script_retrieve(&self, data: &[u8], retr_reply: &str) {
        self.reply("TYPE", "200 Type set to I");
        self.reply("PASV", "227 Entering Passive Mode (127,0,0,1,4,1)");
        if !retr_reply.is_empty() {
            self.reply("RETR", retr_reply);
        }
        self.data(data, true);
    }
}

struct MockConnector {
    state: Rc<RefCell<MockState>>,
}

impl Connector for MockConnector {
    fn create(
        &self,
        host: &str,
        port: u16,
        kind: SocketKind,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(MockTransport {
            state: Rc::clone(&self.state),
            control: port == CONTROL_PORT,
            kind,
            secured: false,
            host: host.to_string(),
            port,
            connected: false,
            monitoring: false,
        }))
    }
}

struct MockTransport {
    state: Rc<RefCell<MockState>>,
    control: bool,
    kind: SocketKind,
    secured: bool,
    host: String,
    port: u16,
    connected: bool,
    monitoring: bool,
}

impl MockTransport {
    /// Secure data sockets start TLS on first use, like `TcpTransport`.
    fn ensure_tls(&mut self) {
        if self.kind == SocketKind::Secure && !self.secured {
            let _ = self.upgrade_to_tls();
        }
    }
}

fn drain(queue: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(queue.len());
    for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
        *slot = byte;
    }
    n
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_resolve {
            return Err(TransportError::Resolve(self.host.clone()));
        }
        if state.fail_connect {
            return Err(TransportError::Connect(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )));
        }

        if self.control {
            state.connects += 1;
            state.control_closed = false;
            state.peer_closed = false;
            state.control_rx.clear();
            let greeting = state.greeting.clone();
            state.control_rx.extend(greeting.bytes());
        } else {
            state.data_opened += 1;
            state.data_closed = false;
            state.data_secured = false;
            state.data_addr = Some((self.host.clone(), self.port));
            state.timeline.push("<data connect>".to_string());
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.monitoring = false;

        let mut state = self.state.borrow_mut();
        if self.control {
            state.control_closed = true;
        } else {
            state.data_closed = true;
            state.data_finished();
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.ensure_tls();
        let mut state = self.state.borrow_mut();
        if self.control {
            let text = String::from_utf8_lossy(data).to_string();
            for line in text.split("\r\n").filter(|line| !line.is_empty()) {
                state.on_command(line);
            }
        } else {
            state.data_sent.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.ensure_tls();
        let mut state = self.state.borrow_mut();
        if self.control {
            if state.control_rx.is_empty() {
                return if state.peer_closed {
                    Ok(0)
                } else {
                    Err(TransportError::WouldBlock)
                };
            }
            Ok(drain(&mut state.control_rx, buf))
        } else {
            if state.data_fail {
                return Err(TransportError::Io(io::Error::from(io::ErrorKind::Other)));
            }
            if state.data_rx.is_empty() {
                if state.data_eof {
                    state.data_finished();
                    return Ok(0);
                }
                return Err(TransportError::WouldBlock);
            }
            Ok(drain(&mut state.data_rx, buf))
        }
    }

    fn set_timeout(&mut self, _timeout: Duration) {}

    fn add_certificate(&mut self, _certificate: &[u8]) -> Result<(), TransportError> {
        self.state.borrow_mut().certificates += 1;
        Ok(())
    }

    fn set_monitoring(&mut self, enabled: bool) {
        self.monitoring = enabled;
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    fn poll(&mut self, timeout: Duration) -> Result<Readiness, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.ensure_tls();
        {
            let mut state = self.state.borrow_mut();
            if self.control {
                if !state.control_rx.is_empty() {
                    return Ok(Readiness::readable());
                }
                if state.peer_closed {
                    return Ok(Readiness::peer_closed());
                }
            } else {
                if !state.data_rx.is_empty() {
                    return Ok(Readiness::readable());
                }
                if state.data_eof {
                    state.data_finished();
                    return Ok(Readiness::peer_closed());
                }
            }
        }

        thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(Readiness::default())
    }

    fn upgrade_to_tls(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.state.borrow_mut();
        if self.control {
            state.upgraded = true;
        } else if !self.secured {
            state.data_secured = true;
            state.timeline.push("<data tls>".to_string());
        }
        self.secured = true;
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        if !self.connected {
            return None;
        }
        let addr = if !self.control {
            format!("127.0.0.1:{}", self.port)
        } else if self.state.borrow().ipv6 {
            format!("[::1]:{}", self.port)
        } else {
            format!("127.0.0.1:{}", self.port)
        };
        addr.parse().ok()
    }
}
